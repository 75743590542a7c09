//! Error taxonomy for a countdown build.
//!
//! Configuration problems are caught before any synthesis starts. Synthesis
//! failures are retried by the cue library and only surface here once the
//! attempt budget is spent. Anything reaching the caller aborts the whole run.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BuildError>;

/// Invalid configuration, rejected before any audio work begins.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("start count must be at least 1")]
    NonPositiveStart,
    #[error("interval must be a positive number of seconds (got {0})")]
    NonPositiveInterval(f64),
    #[error("long interval must be zero or a positive number of seconds (got {0})")]
    NegativeLongInterval(f64),
    #[error("interval of {0} s exceeds the 24 h limit")]
    IntervalTooLong(f64),
    #[error("countdown would run longer than 12 h of audio")]
    TrackTooLong,
    #[error("explicit speak-at list is empty")]
    EmptySpeakSet,
    #[error("speak-at minutes must be 1 or greater")]
    ZeroSpeakMinute,
    #[error("invalid speak-at list '{0}': expected comma-separated integers like '30,15,10,5,1'")]
    MalformedSpeakList(String),
    #[error("tone frequency and duration must be non-zero")]
    InvalidTone,
    #[error("rest text must not be empty when rests are enabled")]
    EmptyRestText,
    #[error("invalid bitrate '{0}': expected something like 128k or 192k")]
    InvalidBitrate(String),
    #[error("unsupported output format '{0}'")]
    UnsupportedFormat(String),
}

/// A single failed attempt to synthesize speech. Always treated as transient.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service returned HTTP {status}")]
    Status { status: u16 },
    #[error("service returned an empty body")]
    EmptyBody,
    #[error("failed to read response body: {0}")]
    Body(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("speech synthesis failed for '{text}' after {attempts} attempt(s): {source}")]
    Synthesis {
        text: String,
        attempts: u32,
        #[source]
        source: SynthesisError,
    },

    #[error("cannot decode audio for '{label}': {reason}")]
    Decode { label: String, reason: String },

    #[error("speech cache error at '{}': {source}", path.display())]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export failed: {0}")]
    Export(String),

    #[error("cannot write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("preset error: {0}")]
    Preset(String),

    #[error("cannot start build thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}
