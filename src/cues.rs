//! Cue library: turns text and tone requests into ready-to-append segments.

use crate::cache::{SpeechCache, cache_key};
use crate::config::{CountdownConfig, ToneSpec};
use crate::error::Result;
use crate::segment::{RawClip, SPEECH_PEAK_DBFS, Segment, make_tone, prep};
use crate::tts::{RetryPolicy, SpeechSynthesizer, synthesize_with_retry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct CueLibrary {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache: SpeechCache,
    language: String,
    region: String,
    fade_ms: u32,
    retry: RetryPolicy,
    tone_spec: ToneSpec,
    tone: Option<Segment>,
    /// Processed speech for this run, keyed by text.
    resolved: HashMap<String, Segment>,
}

impl CueLibrary {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        cache: SpeechCache,
        config: &CountdownConfig,
    ) -> Self {
        CueLibrary {
            synthesizer,
            cache,
            language: config.language.clone(),
            region: config.region.clone(),
            fade_ms: config.fade_ms,
            retry: RetryPolicy::new(
                config.tts_attempts,
                Duration::from_millis(config.tts_retry_delay_ms),
            ),
            tone_spec: config.tone,
            tone: None,
            resolved: HashMap::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Processed speech for `text`, from the run memo, the disk cache, or the synthesizer.
    pub fn resolve(&mut self, text: &str) -> Result<Segment> {
        if let Some(segment) = self.resolved.get(text) {
            return Ok(segment.clone());
        }

        let key = cache_key(&self.language, &self.region, text);
        let synthesizer = Arc::clone(&self.synthesizer);
        let (language, region, retry) = (&self.language, &self.region, &self.retry);
        let bytes = self
            .cache
            .get_or_compute(&key, synthesizer.file_extension(), || {
                synthesize_with_retry(synthesizer.as_ref(), text, language, region, retry)
            })?;

        let segment = prep(RawClip::decode(bytes, text)?, SPEECH_PEAK_DBFS, self.fade_ms);
        debug!(text, duration_ms = segment.duration_ms(), "cue resolved");
        self.resolved.insert(text.to_string(), segment.clone());
        Ok(segment)
    }

    /// The beep, built on first use and shared for the rest of the run.
    pub fn tone(&mut self) -> Segment {
        let (spec, fade_ms) = (&self.tone_spec, self.fade_ms);
        self.tone
            .get_or_insert_with(|| make_tone(spec, fade_ms))
            .clone()
    }

    /// Number of distinct phrases resolved so far.
    pub fn phrase_count(&self) -> usize {
        self.resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, SynthesisError};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingVoice {
        calls: AtomicU32,
    }

    impl SpeechSynthesizer for CountingVoice {
        fn synthesize(
            &self,
            text: &str,
            _: &str,
            _: &str,
        ) -> std::result::Result<Vec<u8>, SynthesisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 16_000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut cursor = Cursor::new(Vec::new());
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
                for i in 0..(1600 * text.len().max(1)) {
                    writer.write_sample(((i % 40) as i16 - 20) * 500).unwrap();
                }
                writer.finalize().unwrap();
            }
            Ok(cursor.into_inner())
        }

        fn file_extension(&self) -> &'static str {
            "wav"
        }
    }

    struct DeadVoice;

    impl SpeechSynthesizer for DeadVoice {
        fn synthesize(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> std::result::Result<Vec<u8>, SynthesisError> {
            Err(SynthesisError::Transport("offline".to_string()))
        }
    }

    /// Default settings, two attempts and no backoff.
    fn library(voice: Arc<dyn SpeechSynthesizer>, dir: &std::path::Path) -> CueLibrary {
        let retry = RetryPolicy {
            attempts: 2,
            base_delay: Duration::ZERO,
            jitter: false,
        };
        CueLibrary::new(voice, SpeechCache::new(dir), &CountdownConfig::default()).with_retry(retry)
    }

    #[test]
    fn repeated_text_is_synthesized_once() {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(CountingVoice {
            calls: AtomicU32::new(0),
        });
        let mut lib = library(voice.clone(), dir.path());

        let a = lib.resolve("rest").unwrap();
        let b = lib.resolve("rest").unwrap();
        assert_eq!(a.duration_ms(), b.duration_ms());
        assert_eq!(voice.calls.load(Ordering::SeqCst), 1);
        assert_eq!(lib.phrase_count(), 1);
    }

    #[test]
    fn disk_cache_is_shared_across_libraries() {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(CountingVoice {
            calls: AtomicU32::new(0),
        });
        library(voice.clone(), dir.path()).resolve("go").unwrap();
        library(voice.clone(), dir.path()).resolve("go").unwrap();
        assert_eq!(voice.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolved_speech_is_processed() {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(CountingVoice {
            calls: AtomicU32::new(0),
        });
        let mut lib = library(voice, dir.path());
        // 1600 frames per char at 16 kHz = 100 ms per char
        let seg = lib.resolve("abc").unwrap();
        assert!((299..=300).contains(&seg.duration_ms()));
        let first = seg.samples().next().unwrap();
        assert!(first.abs() < 1e-3, "fade-in should start near silence");
    }

    #[test]
    fn tone_is_built_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = library(Arc::new(DeadVoice), dir.path());
        assert_eq!(lib.tone().duration_ms(), 300);
        assert_eq!(lib.tone().duration_ms(), 300);
    }

    #[test]
    fn exhausted_retries_surface_as_synthesis_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut lib = library(Arc::new(DeadVoice), dir.path());
        let err = lib.resolve("3").unwrap_err();
        assert!(matches!(err, BuildError::Synthesis { attempts: 2, .. }));
        assert!(fs_is_empty(dir.path()));
    }

    fn fs_is_empty(path: &std::path::Path) -> bool {
        std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }
}
