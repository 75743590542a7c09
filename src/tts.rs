//! Speech synthesis collaborator and its retry wrapper.

use crate::error::{BuildError, SynthesisError};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

/// Converts text into an encoded audio payload (mp3, wav, ...).
///
/// Implementations may fail intermittently; callers go through
/// [`synthesize_with_retry`].
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, language: &str, region: &str)
    -> Result<Vec<u8>, SynthesisError>;

    /// Extension used when the payload is stored in the speech cache.
    fn file_extension(&self) -> &'static str {
        "mp3"
    }
}

// ── Retry ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; grows linearly with each retry.
    pub base_delay: Duration,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1200),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            base_delay,
            jitter: true,
        }
    }

    /// Delay after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(attempt + 1);
        if self.jitter && !delay.is_zero() {
            let extra_ms = fastrand::u64(0..=delay.as_millis() as u64 / 10);
            delay + Duration::from_millis(extra_ms)
        } else {
            delay
        }
    }
}

/// Call the synthesizer until it succeeds or the attempt budget is spent.
pub fn synthesize_with_retry(
    synthesizer: &dyn SpeechSynthesizer,
    text: &str,
    language: &str,
    region: &str,
    policy: &RetryPolicy,
) -> Result<Vec<u8>, BuildError> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        match synthesizer.synthesize(text, language, region) {
            Ok(bytes) => {
                debug!(text, attempt, bytes = bytes.len(), "speech synthesized");
                return Ok(bytes);
            }
            Err(err) if attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    text,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "speech synthesis failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(BuildError::Synthesis {
                    text: text.to_string(),
                    attempts,
                    source: err,
                });
            }
        }
    }
}

// ── Google Translate voice ───────────────────────────────────────────────────

/// Longest text the translate endpoint accepts in one request.
const MAX_CHUNK_CHARS: usize = 100;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) countdown-builder";

/// Synthesizer backed by the Google Translate voice endpoint. `region` selects the
/// top-level domain (`com`, `co.uk`, `com.au`, ...), which changes the accent.
pub struct GoogleTranslateTts {
    agent: ureq::Agent,
}

impl GoogleTranslateTts {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        GoogleTranslateTts { agent }
    }

    fn fetch_chunk(
        &self,
        chunk: &str,
        idx: usize,
        total: usize,
        language: &str,
        region: &str,
    ) -> Result<Vec<u8>, SynthesisError> {
        let url = format!("https://translate.google.{}/translate_tts", region);
        let response = self
            .agent
            .get(&url)
            .query("ie", "UTF-8")
            .query("q", chunk)
            .query("tl", language)
            .query("client", "tw-ob")
            .query("total", &total.to_string())
            .query("idx", &idx.to_string())
            .query("textlen", &chunk.chars().count().to_string())
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => SynthesisError::Status { status },
                ureq::Error::Transport(t) => SynthesisError::Transport(t.to_string()),
            })?;

        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body)?;
        if body.is_empty() {
            return Err(SynthesisError::EmptyBody);
        }
        Ok(body)
    }
}

impl Default for GoogleTranslateTts {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl SpeechSynthesizer for GoogleTranslateTts {
    fn synthesize(
        &self,
        text: &str,
        language: &str,
        region: &str,
    ) -> Result<Vec<u8>, SynthesisError> {
        let chunks = split_text(text, MAX_CHUNK_CHARS);
        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            // MP3 frames are self-delimiting, so chunk payloads concatenate cleanly.
            audio.extend(self.fetch_chunk(chunk, idx, chunks.len(), language, region)?);
        }
        if audio.is_empty() {
            return Err(SynthesisError::EmptyBody);
        }
        Ok(audio)
    }
}

/// Split on whitespace into chunks of at most `max_chars` characters.
/// Words longer than the limit are cut.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(max_chars);
            chunks.push(word.into_iter().collect());
            word = rest;
        }
        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + word.len() > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.extend(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
