use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use countdown_builder::cache::SpeechCache;
use countdown_builder::config::{CountdownConfig, Mode, SpeakPolicy};
use countdown_builder::export::timeline_json;
use countdown_builder::runner::{self, BuildEvent};
use countdown_builder::telemetry::init_tracing;
use countdown_builder::tts::GoogleTranslateTts;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Numbers,
    Minutes,
}

/// Build a voiced countdown with beeps and rest prompts.
///
/// Every option falls back to the loaded preset (if any), then to the built-in default.
#[derive(Parser)]
#[command(name = "countdown", version)]
struct Cli {
    /// Starting number (reps or minutes depending on mode) [default: 80]
    #[arg(long)]
    start: Option<u32>,
    /// Countdown mode [default: numbers]
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Seconds between normal cues (numbers mode, or unspoken minutes) [default: 3.5]
    #[arg(long)]
    interval: Option<f64>,
    /// Seconds of silence after a rest cue [default: 8.0]
    #[arg(long)]
    long_interval: Option<f64>,
    /// Insert a rest cue every N counts, 0 to disable [default: 8]
    #[arg(long)]
    every_n: Option<u32>,
    /// (Minutes mode) Speak every N minutes, 0 = all minutes
    #[arg(long)]
    speak_interval: Option<u32>,
    /// (Minutes mode) Speak only these minutes, e.g. "30,15,10,5,1"
    #[arg(long)]
    speak_at: Option<String>,
    /// (Minutes mode) Text appended to the minute count [default: "minutes remaining"]
    #[arg(long)]
    minute_text: Option<String>,
    /// Voice language code (en, es, ...) [default: en]
    #[arg(long)]
    lang: Option<String>,
    /// Voice region (com, co.uk, com.au, ...) [default: com]
    #[arg(long, alias = "region")]
    tld: Option<String>,
    /// Beep frequency in Hz [default: 1000]
    #[arg(long)]
    beep_freq: Option<u32>,
    /// Beep duration in ms [default: 300]
    #[arg(long)]
    beep_ms: Option<u32>,
    /// Beep gain in dB, negative = quieter [default: -6]
    #[arg(long, allow_hyphen_values = true)]
    beep_gain: Option<f32>,
    /// Fade in/out per segment in ms [default: 12]
    #[arg(long)]
    fade_ms: Option<u32>,
    /// Output audio file; extension picks the format [default: countdown_combined.mp3]
    #[arg(long)]
    outfile: Option<PathBuf>,
    /// Output bitrate for lossy formats, e.g. 128k [default: 192k]
    #[arg(long)]
    out_bitrate: Option<String>,
    /// Optional spoken lead-in line (e.g. "Get ready")
    #[arg(long)]
    lead_in: Option<String>,
    /// Silence after the lead-in, in ms [default: 1000]
    #[arg(long)]
    lead_in_gap_ms: Option<u32>,
    /// Word spoken at rest cues [default: rest]
    #[arg(long)]
    rest_text: Option<String>,
    /// Number of initial rest periods to skip [default: 0]
    #[arg(long)]
    skip_first_rest: Option<u32>,
    /// Optional phrase spoken at the very end (e.g. "Good job!")
    #[arg(long)]
    end_with: Option<String>,
    /// Speech cache directory [default: tts_cache]
    #[arg(long, conflicts_with = "user_cache")]
    cache_dir: Option<PathBuf>,
    /// Keep the speech cache in the per-user cache directory
    #[arg(long)]
    user_cache: bool,
    /// Speech synthesis attempts before giving up [default: 3]
    #[arg(long)]
    tts_attempts: Option<u32>,
    /// Load settings from a JSON preset
    #[arg(long)]
    preset: Option<PathBuf>,
    /// Save the effective settings as a JSON preset
    #[arg(long)]
    save_preset: Option<PathBuf>,
    /// Assemble and print the timeline without writing audio
    #[arg(long)]
    dry_run: bool,
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Merge flags over the preset (or defaults).
    fn into_config(self) -> Result<CountdownConfig> {
        let mut cfg = match &self.preset {
            Some(path) => CountdownConfig::load_preset(path)?,
            None => CountdownConfig::default(),
        };

        macro_rules! apply {
            ($($flag:ident => $field:expr),* $(,)?) => {
                $(if let Some(v) = self.$flag { $field = v; })*
            };
        }
        apply! {
            start => cfg.start,
            interval => cfg.interval_secs,
            long_interval => cfg.long_interval_secs,
            every_n => cfg.every_n,
            minute_text => cfg.minute_text,
            lang => cfg.language,
            tld => cfg.region,
            beep_freq => cfg.tone.frequency_hz,
            beep_ms => cfg.tone.duration_ms,
            beep_gain => cfg.tone.gain_db,
            fade_ms => cfg.fade_ms,
            outfile => cfg.output,
            out_bitrate => cfg.bitrate,
            lead_in_gap_ms => cfg.lead_in_gap_ms,
            rest_text => cfg.rest_text,
            skip_first_rest => cfg.skip_first_rest,
            cache_dir => cfg.cache_dir,
            tts_attempts => cfg.tts_attempts,
        }

        if let Some(mode) = self.mode {
            cfg.mode = match mode {
                ModeArg::Numbers => Mode::Numbers,
                ModeArg::Minutes => Mode::Minutes,
            };
        }
        if self.lead_in.is_some() {
            cfg.lead_in = self.lead_in;
        }
        if self.end_with.is_some() {
            cfg.end_with = self.end_with;
        }
        // A blank --speak-at is the same as leaving it out.
        let speak_at = self.speak_at.as_deref().filter(|l| !l.trim().is_empty());
        if speak_at.is_some() && self.speak_interval.is_some() {
            bail!("--speak-interval and --speak-at cannot be used together");
        }
        if speak_at.is_some() || self.speak_interval.is_some() {
            cfg.speak = SpeakPolicy::from_options(self.speak_interval.unwrap_or(0), speak_at)?;
        }
        if self.user_cache {
            cfg.cache_dir = SpeechCache::user_default().dir().to_path_buf();
        }
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "info" });

    let dry_run = cli.dry_run;
    let save_preset = cli.save_preset.clone();
    let config = cli.into_config()?;
    config.validate().context("invalid settings")?;

    if let Some(path) = &save_preset {
        config.save_preset(path)?;
        println!("Saved preset: {}", path.display());
    }

    let voice = Arc::new(GoogleTranslateTts::default());

    if dry_run {
        let assembly = runner::assemble_countdown(&config, voice, |_| {})?;
        println!("{}", timeline_json(&assembly.timeline)?);
        eprintln!(
            "{} entries, {} spoken, total {:.1}s",
            assembly.timeline.len(),
            assembly.spoken,
            assembly.duration_ms() as f64 / 1000.0
        );
        return Ok(());
    }

    let noun = match config.mode {
        Mode::Numbers => "count",
        Mode::Minutes => "minute",
    };
    println!("Building {}-{} countdown...", config.start, noun);

    let cache_dir = config.cache_dir.clone();
    let handle = runner::spawn_build(config, voice)?;
    let report = handle
        .wait_with(|event| match event {
            BuildEvent::Step(step) => {
                eprint!("\r  [{}/{}]", step.completed, step.total);
                let _ = std::io::stderr().flush();
            }
            BuildEvent::Exporting => eprintln!("\n  exporting..."),
            _ => {}
        })
        .map_err(|message| anyhow!(message))?;

    println!("Wrote: {}", report.audio_path.display());
    println!("Wrote: {}", report.timeline_path.display());
    println!(
        "Duration: {:.1}s, {} timeline entries",
        report.duration_ms as f64 / 1000.0,
        report.entries
    );
    println!(
        "Tip: speech is cached in {} (delete to refresh voices).",
        cache_dir.display()
    );
    Ok(())
}
