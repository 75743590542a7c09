//! Timeline recorder and the track it describes.
//!
//! Every segment appended to the track is paired with exactly one timeline
//! entry spanning it, so the entries stay contiguous and the last `end`
//! always equals the track duration.

use crate::segment::Segment;
use serde::{Deserialize, Serialize};

/// One labeled interval of the output, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub label: String,
    pub start: u64,
    pub end: u64,
}

impl TimelineEntry {
    pub fn duration_ms(&self) -> u64 {
        self.end - self.start
    }
}

/// The assembled audio: segments in emission order.
#[derive(Debug, Clone, Default)]
pub struct Track {
    segments: Vec<Segment>,
    duration_ms: u64,
}

impl Track {
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn frame_count(&self) -> usize {
        self.segments.iter().map(Segment::frame_count).sum()
    }

    /// All samples of the track, mono at the target rate.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.segments.iter().flat_map(|s| s.samples())
    }
}

#[derive(Debug, Default)]
pub struct TimelineRecorder {
    offset_ms: u64,
    entries: Vec<TimelineEntry>,
    track: Track,
}

impl TimelineRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `segment` to the track and record it under `label`.
    pub fn append(&mut self, label: impl Into<String>, segment: Segment) {
        let start = self.offset_ms;
        let end = start + segment.duration_ms();
        self.entries.push(TimelineEntry {
            label: label.into(),
            start,
            end,
        });
        self.track.duration_ms = end;
        self.track.segments.push(segment);
        self.offset_ms = end;
    }

    pub fn offset_ms(&self) -> u64 {
        self.offset_ms
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn finish(self) -> (Track, Vec<TimelineEntry>) {
        (self.track, self.entries)
    }
}

/// True when each entry starts where the previous one ended, starting at 0.
pub fn is_contiguous(entries: &[TimelineEntry]) -> bool {
    entries.first().is_none_or(|e| e.start == 0)
        && entries.windows(2).all(|w| w[1].start == w[0].end)
        && entries.iter().all(|e| e.end >= e.start)
}
