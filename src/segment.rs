//! Audio segment primitives.
//!
//! A `RawClip` is audio as it arrives from a decoder or generator: interleaved,
//! any channel count, any rate. `prep` turns it into a `Segment`, which is always
//! mono at `TARGET_RATE` and a whole number of milliseconds long, so durations
//! add up exactly when segments are concatenated.

use crate::config::ToneSpec;
use crate::error::{BuildError, Result};
use rodio::buffer::SamplesBuffer;
use rodio::source::{SineWave, UniformSourceIterator};
use rodio::{Decoder, Source};
use std::io::Cursor;
use std::sync::Arc;

/// Output sample rate. A multiple of 1000 so one millisecond is a whole frame count.
pub const TARGET_RATE: u32 = 48_000;
pub const FRAMES_PER_MS: usize = (TARGET_RATE / 1000) as usize;

/// Peak level speech is normalized to, in dBFS.
pub const SPEECH_PEAK_DBFS: f32 = -0.1;

// ── Raw clips ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RawClip {
    pub channels: u16,
    pub sample_rate: u32,
    /// Interleaved samples in -1.0..=1.0.
    pub samples: Vec<f32>,
}

impl RawClip {
    /// Decode a compressed or PCM payload (mp3, wav, ...) into samples.
    pub fn decode(bytes: Vec<u8>, label: &str) -> Result<Self> {
        let decoder = Decoder::new(Cursor::new(bytes)).map_err(|e| BuildError::Decode {
            label: label.to_string(),
            reason: e.to_string(),
        })?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        if channels == 0 || sample_rate == 0 {
            return Err(BuildError::Decode {
                label: label.to_string(),
                reason: format!("bad stream layout ({channels} ch @ {sample_rate} Hz)"),
            });
        }
        let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
        Ok(RawClip {
            channels,
            sample_rate,
            samples,
        })
    }

    /// Full-scale sine wave, mono.
    pub fn sine(frequency_hz: u32, duration_ms: u32) -> Self {
        let source = SineWave::new(frequency_hz as f32);
        let sample_rate = source.sample_rate();
        let channels = source.channels();
        let frames = (duration_ms as u64 * sample_rate as u64 / 1000) as usize;
        RawClip {
            channels,
            sample_rate,
            samples: source.take(frames * channels as usize).collect(),
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Scale so the loudest sample sits at `target_dbfs`. Silent clips pass through.
    pub fn normalize(mut self, target_dbfs: f32) -> Self {
        let peak = self.peak();
        if peak <= f32::EPSILON {
            return self;
        }
        let gain = db_to_amplitude(target_dbfs.min(0.0)) / peak;
        for s in &mut self.samples {
            *s *= gain;
        }
        self
    }

    /// Linear fade-in and fade-out of `fade_ms` each, clamped to half the clip.
    pub fn fade(mut self, fade_ms: u32) -> Self {
        let channels = self.channels.max(1) as usize;
        let frames = self.frames();
        let fade_frames =
            ((fade_ms as u64 * self.sample_rate as u64 / 1000) as usize).min(frames / 2);
        if fade_frames == 0 {
            return self;
        }
        for i in 0..fade_frames {
            let gain = i as f32 / fade_frames as f32;
            let head = i * channels;
            let tail = (frames - 1 - i) * channels;
            for ch in 0..channels {
                self.samples[head + ch] *= gain;
                self.samples[tail + ch] *= gain;
            }
        }
        self
    }

    /// Downmix to mono by averaging, resample to `TARGET_RATE`, trim to whole milliseconds.
    pub fn into_segment(self) -> Segment {
        let channels = self.channels.max(1) as usize;
        let mono: Vec<f32> = if channels == 1 {
            self.samples
        } else {
            self.samples
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        let samples = if self.sample_rate == TARGET_RATE || mono.is_empty() {
            mono
        } else {
            let source = SamplesBuffer::new(1, self.sample_rate, mono);
            UniformSourceIterator::<_, f32>::new(source, 1, TARGET_RATE).collect()
        };
        Segment::from_samples(samples)
    }
}

/// Fixed processing chain: loudness normalization, edge fades, then mono/rate unification.
pub fn prep(clip: RawClip, peak_dbfs: f32, fade_ms: u32) -> Segment {
    clip.normalize(peak_dbfs).fade(fade_ms).into_segment()
}

/// Beep segment. The gain sets the tone's peak relative to the speech peak.
pub fn make_tone(spec: &ToneSpec, fade_ms: u32) -> Segment {
    let peak = (SPEECH_PEAK_DBFS + spec.gain_db).min(SPEECH_PEAK_DBFS);
    prep(RawClip::sine(spec.frequency_hz, spec.duration_ms), peak, fade_ms)
}

pub fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

// ── Segments ─────────────────────────────────────────────────────────────────

/// Immutable mono audio at `TARGET_RATE`. Cloning is cheap; PCM is shared and
/// silence is stored as a length only.
#[derive(Debug, Clone)]
pub struct Segment {
    data: SegmentData,
}

#[derive(Debug, Clone)]
enum SegmentData {
    Pcm(Arc<[f32]>),
    Silence { ms: u64 },
}

impl Segment {
    pub fn silence(ms: u64) -> Self {
        Segment {
            data: SegmentData::Silence { ms },
        }
    }

    /// Wrap mono `TARGET_RATE` samples, dropping any trailing partial millisecond.
    pub fn from_samples(mut samples: Vec<f32>) -> Self {
        samples.truncate(samples.len() / FRAMES_PER_MS * FRAMES_PER_MS);
        Segment {
            data: SegmentData::Pcm(samples.into()),
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match &self.data {
            SegmentData::Pcm(samples) => (samples.len() / FRAMES_PER_MS) as u64,
            SegmentData::Silence { ms } => *ms,
        }
    }

    pub fn frame_count(&self) -> usize {
        match &self.data {
            SegmentData::Pcm(samples) => samples.len(),
            SegmentData::Silence { ms } => *ms as usize * FRAMES_PER_MS,
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self.data, SegmentData::Silence { .. })
    }

    pub fn samples(&self) -> Box<dyn Iterator<Item = f32> + '_> {
        match &self.data {
            SegmentData::Pcm(samples) => Box::new(samples.iter().copied()),
            SegmentData::Silence { ms } => {
                Box::new(std::iter::repeat_n(0.0, *ms as usize * FRAMES_PER_MS))
            }
        }
    }

    /// Join two segments into one PCM segment.
    pub fn concat(&self, other: &Segment) -> Segment {
        if let (SegmentData::Silence { ms: a }, SegmentData::Silence { ms: b }) =
            (&self.data, &other.data)
        {
            return Segment::silence(a + b);
        }
        let mut samples = Vec::with_capacity(self.frame_count() + other.frame_count());
        samples.extend(self.samples());
        samples.extend(other.samples());
        Segment::from_samples(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(v).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn silence_has_exact_duration() {
        let s = Segment::silence(3500);
        assert_eq!(s.duration_ms(), 3500);
        assert_eq!(s.frame_count(), 3500 * FRAMES_PER_MS);
        assert!(s.samples().all(|x| x == 0.0));
    }

    #[test]
    fn from_samples_trims_partial_millisecond() {
        let s = Segment::from_samples(vec![0.1; FRAMES_PER_MS * 10 + 7]);
        assert_eq!(s.duration_ms(), 10);
        assert_eq!(s.frame_count(), FRAMES_PER_MS * 10);
    }

    #[test]
    fn concat_adds_durations() {
        let a = Segment::from_samples(vec![0.5; FRAMES_PER_MS * 20]);
        let b = Segment::silence(30);
        let joined = a.concat(&b);
        assert_eq!(joined.duration_ms(), 50);
        assert!(!joined.is_silence());
        assert!(Segment::silence(5).concat(&Segment::silence(6)).is_silence());
    }

    #[test]
    fn normalize_hits_target_peak() {
        let clip = RawClip {
            channels: 1,
            sample_rate: TARGET_RATE,
            samples: vec![0.1, -0.25, 0.2],
        }
        .normalize(-6.0);
        assert!((clip.peak() - db_to_amplitude(-6.0)).abs() < 1e-4);
    }

    #[test]
    fn normalize_leaves_silence_alone() {
        let clip = RawClip {
            channels: 1,
            sample_rate: TARGET_RATE,
            samples: vec![0.0; 10],
        }
        .normalize(-0.1);
        assert_eq!(clip.peak(), 0.0);
    }

    #[test]
    fn fade_zeroes_edges_and_keeps_middle() {
        let clip = RawClip {
            channels: 2,
            sample_rate: 1000,
            samples: vec![1.0; 200],
        }
        .fade(10);
        assert_eq!(clip.samples[0], 0.0);
        assert_eq!(clip.samples[1], 0.0);
        assert_eq!(clip.samples[198], 0.0);
        assert_eq!(clip.samples[100], 1.0);
    }

    #[test]
    fn fade_longer_than_clip_is_clamped() {
        let clip = RawClip {
            channels: 1,
            sample_rate: 1000,
            samples: vec![1.0; 4],
        }
        .fade(1000);
        assert_eq!(clip.samples.len(), 4);
        assert_eq!(clip.samples[0], 0.0);
    }

    #[test]
    fn stereo_downmix_averages() {
        let seg = RawClip {
            channels: 2,
            sample_rate: TARGET_RATE,
            samples: [0.2, 0.4].repeat(FRAMES_PER_MS),
        }
        .into_segment();
        assert_eq!(seg.duration_ms(), 1);
        assert!(seg.samples().all(|x| (x - 0.3).abs() < 1e-6));
    }

    #[test]
    fn resampling_preserves_duration() {
        let seg = RawClip {
            channels: 1,
            sample_rate: 24_000,
            samples: vec![0.25; 24_000],
        }
        .into_segment();
        let ms = seg.duration_ms();
        assert!((999..=1000).contains(&ms), "got {ms} ms");
    }

    #[test]
    fn sine_tone_matches_requested_length() {
        let tone = make_tone(&ToneSpec::default(), 12);
        assert_eq!(tone.duration_ms(), 300);
    }

    #[test]
    fn tone_gain_lowers_peak() {
        let loud = make_tone(
            &ToneSpec {
                gain_db: 0.0,
                ..Default::default()
            },
            0,
        );
        let quiet = make_tone(
            &ToneSpec {
                gain_db: -12.0,
                ..Default::default()
            },
            0,
        );
        let peak = |s: &Segment| s.samples().fold(0.0_f32, |a, x| a.max(x.abs()));
        assert!(peak(&quiet) < peak(&loud) * 0.5);
    }

    #[test]
    fn decode_wav_payload() {
        let clip = RawClip::decode(wav_bytes(2, 22_050, 22_050), "test").unwrap();
        assert_eq!(clip.channels, 2);
        assert_eq!(clip.sample_rate, 22_050);
        assert_eq!(clip.frames(), 22_050);
        let seg = prep(clip, SPEECH_PEAK_DBFS, 12);
        assert!((999..=1000).contains(&seg.duration_ms()));
    }

    #[test]
    fn decode_rejects_garbage() {
        let result = RawClip::decode(b"definitely not audio".to_vec(), "junk");
        assert!(matches!(result, Err(BuildError::Decode { .. })));
    }
}
