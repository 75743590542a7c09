//! Export: intermediate WAV, one ffmpeg encode, timeline sidecar.
//!
//! The track is written once as 16-bit PCM WAV and encoded to the target format
//! in a single ffmpeg invocation. Both output files are written to temporary
//! siblings and renamed into place; if the sidecar cannot be published the audio
//! is removed again, so callers see both files or neither.

use crate::error::{BuildError, ConfigError, Result};
use crate::segment::TARGET_RATE;
use crate::timeline::{TimelineEntry, Track};
use lofty::file::AudioFile;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

// ── Formats ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp3,
    Ogg,
    M4a,
    Flac,
    /// The intermediate WAV is published as-is; no lossy stage.
    Wav,
}

impl OutputFormat {
    /// Pick the format from the output file extension.
    pub fn from_path(path: &Path) -> std::result::Result<Self, ConfigError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "ogg" => Ok(OutputFormat::Ogg),
            "m4a" | "aac" => Ok(OutputFormat::M4a),
            "flac" => Ok(OutputFormat::Flac),
            "wav" => Ok(OutputFormat::Wav),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }

    /// ffmpeg muxer name and audio codec.
    fn ffmpeg_target(&self) -> (&'static str, &'static str) {
        match self {
            OutputFormat::Mp3 => ("mp3", "libmp3lame"),
            OutputFormat::Ogg => ("ogg", "libvorbis"),
            OutputFormat::M4a => ("ipod", "aac"),
            OutputFormat::Flac => ("flac", "flac"),
            OutputFormat::Wav => ("wav", "pcm_s16le"),
        }
    }

    fn is_lossy(&self) -> bool {
        matches!(self, OutputFormat::Mp3 | OutputFormat::Ogg | OutputFormat::M4a)
    }
}

// ── WAV ──────────────────────────────────────────────────────────────────────

/// Write the track as mono 16-bit PCM at the target rate.
pub fn write_wav(track: &Track, path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: TARGET_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_err =
        |e: hound::Error| BuildError::Export(format!("WAV write '{}': {}", path.display(), e));
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for sample in track.samples() {
        let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(pcm).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)?;
    debug!(path = %path.display(), frames = track.frame_count(), "intermediate WAV written");
    Ok(())
}

// ── ffmpeg ───────────────────────────────────────────────────────────────────

/// Build the ffmpeg argument list that encodes `input_path` into `output_path`.
pub fn build_ffmpeg_args(
    input_path: &str,
    output_path: &str,
    format: OutputFormat,
    bitrate: &str,
) -> Vec<String> {
    let (muxer, codec) = format.ffmpeg_target();
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input_path.to_string(),
        "-codec:a".into(),
        codec.into(),
    ];
    if format.is_lossy() {
        args.push("-b:a".into());
        args.push(bitrate.to_string());
    }
    // Explicit muxer: the temporary output name carries no usable extension.
    args.push("-f".into());
    args.push(muxer.into());
    args.push(output_path.to_string());
    args
}

/// Run ffmpeg with the given argument list.
pub fn run_ffmpeg(args: &[String]) -> Result<()> {
    let output = Command::new("ffmpeg")
        .args(args)
        .output()
        .map_err(|e| BuildError::Export(format!("failed to launch ffmpeg: {e}")))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(BuildError::Export(format!(
            "ffmpeg exited with status {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

// ── Sidecar ──────────────────────────────────────────────────────────────────

pub fn timeline_json(entries: &[TimelineEntry]) -> Result<String> {
    serde_json::to_string_pretty(entries)
        .map_err(|e| BuildError::Export(format!("timeline serialize error: {e}")))
}

// ── Publishing ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExportedFiles {
    pub audio_path: PathBuf,
    pub timeline_path: PathBuf,
    /// Duration read back from the published audio, when the container reports one.
    pub probed_duration: Option<Duration>,
}

/// Encode `track` to `audio_path` and write `timeline` next to it.
pub fn export(
    track: &Track,
    timeline: &[TimelineEntry],
    audio_path: &Path,
    timeline_path: &Path,
    bitrate: &str,
) -> Result<ExportedFiles> {
    let format = OutputFormat::from_path(audio_path)?;
    let json = timeline_json(timeline)?;

    let audio_dir = parent_dir(audio_path);
    fs::create_dir_all(&audio_dir).map_err(|e| BuildError::io(&audio_dir, e))?;
    let staged_audio = staging_file(&audio_dir)?;

    if format == OutputFormat::Wav {
        write_wav(track, staged_audio.path())?;
    } else {
        let work = tempfile::tempdir().map_err(|e| BuildError::io(std::env::temp_dir(), e))?;
        let wav_path = work.path().join("combined.wav");
        write_wav(track, &wav_path)?;
        let args = build_ffmpeg_args(
            &wav_path.to_string_lossy(),
            &staged_audio.path().to_string_lossy(),
            format,
            bitrate,
        );
        run_ffmpeg(&args)?;
    }

    staged_audio
        .persist(audio_path)
        .map_err(|e| BuildError::io(audio_path, e.error))?;
    info!(path = %audio_path.display(), "audio published");

    if let Err(err) = publish_text(timeline_path, &json) {
        warn!(%err, "timeline write failed, removing audio");
        let _ = fs::remove_file(audio_path);
        return Err(err);
    }
    info!(path = %timeline_path.display(), entries = timeline.len(), "timeline published");

    Ok(ExportedFiles {
        audio_path: audio_path.to_path_buf(),
        timeline_path: timeline_path.to_path_buf(),
        probed_duration: probe_duration(audio_path),
    })
}

fn publish_text(path: &Path, contents: &str) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;
    let mut staged = staging_file(&dir)?;
    staged
        .write_all(contents.as_bytes())
        .map_err(|e| BuildError::io(path, e))?;
    staged
        .persist(path)
        .map_err(|e| BuildError::io(path, e.error))?;
    Ok(())
}

fn staging_file(dir: &Path) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(".countdown-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(|e| BuildError::io(dir, e))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Read the duration of an audio file from its container metadata.
pub fn probe_duration(path: &Path) -> Option<Duration> {
    match lofty::read_from_path(path) {
        Ok(file) => Some(file.properties().duration()),
        Err(e) => {
            debug!(path = %path.display(), %e, "could not probe output duration");
            None
        }
    }
}
