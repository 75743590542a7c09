//! Build runner: one full countdown build, blocking or on a background thread.
//!
//! `build_countdown` validates, assembles and exports in one call. `spawn_build`
//! runs the same thing on a dedicated thread and reports through a
//! `BuildHandle` wrapping an `mpsc::Receiver<BuildEvent>`, so front-ends poll a
//! channel instead of sharing a mutable status object.

use crate::assembler::{Assembly, CountdownPlan, Step, assemble};
use crate::cache::SpeechCache;
use crate::config::CountdownConfig;
use crate::cues::CueLibrary;
use crate::error::{BuildError, Result};
use crate::export;
use crate::tts::SpeechSynthesizer;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{error, info};

// ── Events & report ──────────────────────────────────────────────────────────

/// Summary of a completed build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub audio_path: PathBuf,
    pub timeline_path: PathBuf,
    pub duration_ms: u64,
    pub entries: usize,
    pub spoken: u32,
    /// Duration read back from the published file, if the container reports one.
    pub probed_duration_ms: Option<u64>,
}

/// Progress notifications, in order: `Started`, one `Step` per count,
/// `Exporting`, then exactly one of `Finished` / `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Started { total_steps: u32 },
    Step(Step),
    Exporting,
    Finished(BuildReport),
    Failed(String),
}

impl BuildEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildEvent::Finished(_) | BuildEvent::Failed(_))
    }
}

// ── Blocking API ─────────────────────────────────────────────────────────────

/// Validate `config` and assemble the track and timeline in memory.
pub fn assemble_countdown<F>(
    config: &CountdownConfig,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    on_step: F,
) -> Result<Assembly>
where
    F: FnMut(Step),
{
    config.validate()?;
    let cache = SpeechCache::new(config.cache_dir.clone());
    let mut cues = CueLibrary::new(synthesizer, cache, config);
    let plan = CountdownPlan::from_config(config);
    info!(start = plan.start, mode = ?config.mode, "building countdown");
    assemble(&plan, &mut cues, on_step)
}

/// Full build: validate, assemble, export. Nothing is written unless every step succeeds.
pub fn build_countdown(
    config: &CountdownConfig,
    synthesizer: Arc<dyn SpeechSynthesizer>,
) -> Result<BuildReport> {
    build_countdown_with_events(config, synthesizer, |_| {})
}

/// Like `build_countdown`, reporting progress to `on_event`. Terminal events are
/// not emitted here; the caller sees the returned `Result` instead.
pub fn build_countdown_with_events<F>(
    config: &CountdownConfig,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    mut on_event: F,
) -> Result<BuildReport>
where
    F: FnMut(BuildEvent),
{
    config.validate()?;
    on_event(BuildEvent::Started {
        total_steps: config.start,
    });
    let assembly = assemble_countdown(config, synthesizer, |step| {
        on_event(BuildEvent::Step(step))
    })?;

    on_event(BuildEvent::Exporting);
    let files = export::export(
        &assembly.track,
        &assembly.timeline,
        &config.output,
        &config.timeline_path(),
        &config.bitrate,
    )?;

    Ok(BuildReport {
        audio_path: files.audio_path,
        timeline_path: files.timeline_path,
        duration_ms: assembly.duration_ms(),
        entries: assembly.timeline.len(),
        spoken: assembly.spoken,
        probed_duration_ms: files.probed_duration.map(|d| d.as_millis() as u64),
    })
}

// ── Background builds ────────────────────────────────────────────────────────

/// Handle to a build running on its own thread.
pub struct BuildHandle {
    rx: mpsc::Receiver<BuildEvent>,
    thread: Option<JoinHandle<()>>,
}

impl BuildHandle {
    /// Next event, if one is ready. Never blocks.
    pub fn try_event(&self) -> Option<BuildEvent> {
        self.rx.try_recv().ok()
    }

    /// Block for the next event. `None` once the build thread is gone.
    pub fn next_event(&self) -> Option<BuildEvent> {
        self.rx.recv().ok()
    }

    /// Block until the build finishes, forwarding intermediate events to `on_event`.
    pub fn wait_with<F>(mut self, mut on_event: F) -> std::result::Result<BuildReport, String>
    where
        F: FnMut(&BuildEvent),
    {
        let outcome = loop {
            match self.rx.recv() {
                Ok(BuildEvent::Finished(report)) => break Ok(report),
                Ok(BuildEvent::Failed(message)) => break Err(message),
                Ok(event) => on_event(&event),
                Err(_) => break Err("build thread exited unexpectedly".to_string()),
            }
        };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        outcome
    }

    pub fn wait(self) -> std::result::Result<BuildReport, String> {
        self.wait_with(|_| {})
    }
}

/// Start a build on a dedicated thread.
pub fn spawn_build(
    config: CountdownConfig,
    synthesizer: Arc<dyn SpeechSynthesizer>,
) -> Result<BuildHandle> {
    let (tx, rx) = mpsc::channel::<BuildEvent>();

    let thread = std::thread::Builder::new()
        .name("countdown-build".into())
        .spawn(move || {
            let progress = tx.clone();
            let result = build_countdown_with_events(&config, synthesizer, |event| {
                let _ = progress.send(event);
            });
            let terminal = match result {
                Ok(report) => BuildEvent::Finished(report),
                Err(err) => {
                    error!(%err, "countdown build failed");
                    BuildEvent::Failed(err.to_string())
                }
            };
            let _ = tx.send(terminal);
        })
        .map_err(BuildError::Spawn)?;

    Ok(BuildHandle {
        rx,
        thread: Some(thread),
    })
}
