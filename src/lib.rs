//! countdown_builder: voiced countdown tracks with a cue timeline.
//!
//! Assembly, caching and export logic lives here.
//! The `countdown` CLI is a thin front-end over `runner`.

pub mod assembler;
pub mod cache;
pub mod config;
pub mod cues;
pub mod error;
pub mod export;
pub mod runner;
pub mod segment;
pub mod telemetry;
pub mod timeline;
pub mod tts;

pub use config::{CountdownConfig, Mode, SpeakPolicy, ToneSpec};
pub use error::{BuildError, ConfigError, Result, SynthesisError};
pub use runner::{BuildEvent, BuildHandle, BuildReport, build_countdown, spawn_build};
pub use timeline::TimelineEntry;
