use crate::assembler::MINUTE_MS;
use crate::error::{BuildError, ConfigError};
use crate::export::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Longest accepted interval or long interval, in seconds.
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Longest silence a build may schedule. The intermediate 16-bit mono WAV at
/// 48 kHz tops out at 2^31 frames (about 12.4 h).
pub const MAX_TRACK_MS: u64 = 12 * 60 * MINUTE_MS;

/// What the descending count means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Count reps: every number is spoken.
    #[default]
    Numbers,
    /// Count minutes remaining, speaking only the selected minutes.
    Minutes,
}

/// Which minutes get a spoken announcement in minutes mode.
///
/// A single enum so "every N minutes" and "explicit minutes" can never both be set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakPolicy {
    #[default]
    Always,
    /// Speak when `minute % n == 0`, plus the final minute.
    Interval(u32),
    /// Speak only the listed minutes.
    At(BTreeSet<u32>),
}

impl SpeakPolicy {
    /// Build a policy from the two front-end options. `interval == 0` means every minute;
    /// a blank `at` list counts as unset.
    pub fn from_options(interval: u32, at: Option<&str>) -> Result<Self, ConfigError> {
        match at.filter(|list| !list.trim().is_empty()) {
            Some(list) => Ok(SpeakPolicy::At(parse_speak_at(list)?)),
            None if interval > 0 => Ok(SpeakPolicy::Interval(interval)),
            None => Ok(SpeakPolicy::Always),
        }
    }

    pub fn should_speak(&self, minute: u32) -> bool {
        match self {
            SpeakPolicy::Always => true,
            SpeakPolicy::Interval(0) => true,
            SpeakPolicy::Interval(n) => minute % n == 0 || minute == 1,
            SpeakPolicy::At(minutes) => minutes.contains(&minute),
        }
    }
}

/// Parse a comma-separated minute list such as `"30,15,10,5,1"`.
pub fn parse_speak_at(list: &str) -> Result<BTreeSet<u32>, ConfigError> {
    list.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| ConfigError::MalformedSpeakList(list.to_string()))
        })
        .collect()
}

/// Beep parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneSpec {
    pub frequency_hz: u32,
    pub duration_ms: u32,
    /// Level relative to the speech peak, in dB (negative = quieter).
    pub gain_db: f32,
}

impl Default for ToneSpec {
    fn default() -> Self {
        ToneSpec {
            frequency_hz: 1000,
            duration_ms: 300,
            gain_db: -6.0,
        }
    }
}

/// Everything a single build needs. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// First number (or minute) spoken; the count runs down to 1.
    pub start: u32,
    pub mode: Mode,
    /// Seconds of silence after a normal beep.
    pub interval_secs: f64,
    /// Seconds of silence after a rest cue.
    pub long_interval_secs: f64,
    /// Insert a rest cue every N counts (0 = never).
    pub every_n: u32,
    pub rest_text: String,
    /// Number of initial rest boundaries played as normal boundaries instead.
    pub skip_first_rest: u32,
    pub language: String,
    /// Voice region, passed through to the synthesizer (e.g. `com`, `co.uk`).
    pub region: String,
    pub tone: ToneSpec,
    pub fade_ms: u32,
    pub lead_in: Option<String>,
    pub lead_in_gap_ms: u32,
    pub end_with: Option<String>,
    pub speak: SpeakPolicy,
    /// Appended to the minute count, e.g. "30 minutes remaining".
    pub minute_text: String,
    pub output: PathBuf,
    pub bitrate: String,
    pub cache_dir: PathBuf,
    pub tts_attempts: u32,
    pub tts_retry_delay_ms: u64,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        CountdownConfig {
            start: 80,
            mode: Mode::Numbers,
            interval_secs: 3.5,
            long_interval_secs: 8.0,
            every_n: 8,
            rest_text: "rest".to_string(),
            skip_first_rest: 0,
            language: "en".to_string(),
            region: "com".to_string(),
            tone: ToneSpec::default(),
            fade_ms: 12,
            lead_in: None,
            lead_in_gap_ms: 1000,
            end_with: None,
            speak: SpeakPolicy::Always,
            minute_text: "minutes remaining".to_string(),
            output: PathBuf::from("countdown_combined.mp3"),
            bitrate: "192k".to_string(),
            cache_dir: PathBuf::from("tts_cache"),
            tts_attempts: 3,
            tts_retry_delay_ms: 1200,
        }
    }
}

impl CountdownConfig {
    /// Reject invalid combinations before any synthesis begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start == 0 {
            return Err(ConfigError::NonPositiveStart);
        }
        if !self.interval_secs.is_finite() || self.interval_secs <= 0.0 {
            return Err(ConfigError::NonPositiveInterval(self.interval_secs));
        }
        if !self.long_interval_secs.is_finite() || self.long_interval_secs < 0.0 {
            return Err(ConfigError::NegativeLongInterval(self.long_interval_secs));
        }
        for secs in [self.interval_secs, self.long_interval_secs] {
            if secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::IntervalTooLong(secs));
            }
        }
        match self.scheduled_silence_ms() {
            Some(ms) if ms <= MAX_TRACK_MS => {}
            _ => return Err(ConfigError::TrackTooLong),
        }
        if let SpeakPolicy::At(minutes) = &self.speak {
            if minutes.is_empty() {
                return Err(ConfigError::EmptySpeakSet);
            }
            if minutes.contains(&0) {
                return Err(ConfigError::ZeroSpeakMinute);
            }
        }
        if self.tone.frequency_hz == 0 || self.tone.duration_ms == 0 {
            return Err(ConfigError::InvalidTone);
        }
        if self.every_n > 0 && self.rest_text.trim().is_empty() {
            return Err(ConfigError::EmptyRestText);
        }
        validate_bitrate(&self.bitrate)?;
        OutputFormat::from_path(&self.output)?;
        Ok(())
    }

    /// Upper bound on the silence the countdown schedules (pauses and the lead-in
    /// gap), or `None` if it does not fit in a `u64`.
    fn scheduled_silence_ms(&self) -> Option<u64> {
        let boundaries = u64::from(self.start.saturating_sub(1));
        let rests = match self.every_n {
            0 => 0,
            n => (u64::from(self.start) / u64::from(n)).min(boundaries),
        };
        let normal_gap = match self.mode {
            Mode::Numbers => self.interval_ms(),
            Mode::Minutes => self.interval_ms().max(MINUTE_MS),
        };
        (boundaries - rests)
            .checked_mul(normal_gap)?
            .checked_add(rests.checked_mul(self.long_interval_ms())?)?
            .checked_add(u64::from(self.lead_in_gap_ms))
    }

    pub fn interval_ms(&self) -> u64 {
        secs_to_ms(self.interval_secs)
    }

    pub fn long_interval_ms(&self) -> u64 {
        secs_to_ms(self.long_interval_secs)
    }

    /// Sidecar path: same base name as the audio output, `.json` extension.
    pub fn timeline_path(&self) -> PathBuf {
        self.output.with_extension("json")
    }

    /// Load a preset saved by `save_preset`. Missing fields take their defaults.
    pub fn load_preset(path: &Path) -> Result<Self, BuildError> {
        let data = fs::read_to_string(path)
            .map_err(|e| BuildError::Preset(format!("cannot read '{}': {}", path.display(), e)))?;
        serde_json::from_str(&data)
            .map_err(|e| BuildError::Preset(format!("corrupt preset '{}': {}", path.display(), e)))
    }

    pub fn save_preset(&self, path: &Path) -> Result<(), BuildError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::Preset(format!("serialize error: {}", e)))?;
        fs::write(path, json).map_err(|e| BuildError::io(path, e))
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    (secs * 1000.0) as u64
}

fn validate_bitrate(bitrate: &str) -> Result<(), ConfigError> {
    let digits = bitrate.strip_suffix('k').unwrap_or("");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidBitrate(bitrate.to_string()));
    }
    Ok(())
}
