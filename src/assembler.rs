//! Countdown assembly.
//!
//! Numbers mode and minutes mode share one descending driver. A
//! [`CountdownPlan`] captures what differs between them: which counts are
//! spoken, how they are phrased, and how long the silence after a normal
//! boundary lasts. The driver walks `start..=1`, appending segments to a
//! [`TimelineRecorder`] and deciding, at every boundary except the last,
//! between a normal beep, a suppressed rest, and a full rest cue.

use crate::config::{CountdownConfig, Mode, SpeakPolicy};
use crate::cues::CueLibrary;
use crate::error::Result;
use crate::segment::Segment;
use crate::timeline::{TimelineEntry, TimelineRecorder, Track};
use tracing::{debug, info};

/// One real minute, used for the silence after a spoken minute.
pub const MINUTE_MS: u64 = 60_000;

pub const LABEL_LEAD_GAP: &str = "lead_gap";
pub const LABEL_BEEP: &str = "beep";
pub const LABEL_PAUSE: &str = "pause";
pub const LABEL_PAUSE_LONG: &str = "pause_long";
pub const LABEL_BEEP_SKIP_REST: &str = "beep_skip_rest";
pub const LABEL_PAUSE_SKIP_REST: &str = "pause_skip_rest";

// ── Cue source seam ──────────────────────────────────────────────────────────

/// Anything that can hand the driver speech and beep segments.
pub trait CueSource {
    fn resolve(&mut self, text: &str) -> Result<Segment>;
    fn tone(&mut self) -> Segment;
}

impl CueSource for CueLibrary {
    fn resolve(&mut self, text: &str) -> Result<Segment> {
        CueLibrary::resolve(self, text)
    }

    fn tone(&mut self) -> Segment {
        CueLibrary::tone(self)
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────────

/// How each count is turned into words.
#[derive(Debug, Clone, PartialEq)]
pub enum Phrasing {
    /// The bare number: "3".
    Number,
    /// "{n} {suffix}", with "minutes" singularized for the last minute.
    Minutes { suffix: String },
}

/// Length of the silence after a normal (or suppressed-rest) boundary beep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GapPolicy {
    /// Always the configured interval.
    Fixed,
    /// A full minute when the count is spoken, otherwise the configured interval.
    MinuteScaled,
}

/// What happens after the count has been spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Count 1: optional end phrase, then stop.
    Final,
    Normal,
    /// A rest boundary suppressed by `skip_first_rest`, played as a normal one.
    SkippedRest,
    Rest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountdownPlan {
    pub start: u32,
    pub speak: SpeakPolicy,
    pub phrasing: Phrasing,
    pub gap: GapPolicy,
    pub interval_ms: u64,
    pub long_interval_ms: u64,
    pub every_n: u32,
    pub skip_first_rest: u32,
    pub rest_text: String,
    pub lead_in: Option<String>,
    pub lead_in_gap_ms: u64,
    pub end_with: Option<String>,
}

impl CountdownPlan {
    pub fn from_config(config: &CountdownConfig) -> Self {
        match config.mode {
            Mode::Numbers => Self::numbers(config),
            Mode::Minutes => Self::minutes(config),
        }
    }

    /// Every number spoken, fixed gaps.
    pub fn numbers(config: &CountdownConfig) -> Self {
        Self::base(config, SpeakPolicy::Always, Phrasing::Number, GapPolicy::Fixed)
    }

    /// Selective speaking, minute-scaled gaps.
    pub fn minutes(config: &CountdownConfig) -> Self {
        Self::base(
            config,
            config.speak.clone(),
            Phrasing::Minutes {
                suffix: config.minute_text.clone(),
            },
            GapPolicy::MinuteScaled,
        )
    }

    fn base(
        config: &CountdownConfig,
        speak: SpeakPolicy,
        phrasing: Phrasing,
        gap: GapPolicy,
    ) -> Self {
        CountdownPlan {
            start: config.start,
            speak,
            phrasing,
            gap,
            interval_ms: config.interval_ms(),
            long_interval_ms: config.long_interval_ms(),
            every_n: config.every_n,
            skip_first_rest: config.skip_first_rest,
            rest_text: config.rest_text.clone(),
            lead_in: non_empty(&config.lead_in),
            lead_in_gap_ms: config.lead_in_gap_ms as u64,
            end_with: non_empty(&config.end_with),
        }
    }

    pub fn should_speak(&self, count: u32) -> bool {
        self.speak.should_speak(count)
    }

    pub fn phrase(&self, count: u32) -> String {
        match &self.phrasing {
            Phrasing::Number => count.to_string(),
            Phrasing::Minutes { suffix } => minute_phrase(count, suffix),
        }
    }

    /// Silence after a normal or suppressed-rest boundary at `count`.
    pub fn gap_ms(&self, count: u32) -> u64 {
        match self.gap {
            GapPolicy::Fixed => self.interval_ms,
            GapPolicy::MinuteScaled if self.should_speak(count) => MINUTE_MS,
            GapPolicy::MinuteScaled => self.interval_ms,
        }
    }

    pub fn rests_enabled(&self) -> bool {
        self.every_n > 0
    }

    /// Boundary kind at `count`, given how many rests were already suppressed.
    pub fn boundary(&self, count: u32, rests_skipped: u32) -> Boundary {
        if count <= 1 {
            Boundary::Final
        } else if self.rests_enabled() && count % self.every_n == 0 {
            if rests_skipped < self.skip_first_rest {
                Boundary::SkippedRest
            } else {
                Boundary::Rest
            }
        } else {
            Boundary::Normal
        }
    }
}

/// "5 minutes remaining"; the last minute reads "1 minute remaining".
pub fn minute_phrase(minute: u32, suffix: &str) -> String {
    let suffix = if minute == 1 {
        suffix.replace("minutes", "minute")
    } else {
        suffix.to_string()
    };
    format!("{minute} {suffix}")
}

fn non_empty(text: &Option<String>) -> Option<String> {
    text.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

// ── Driver ───────────────────────────────────────────────────────────────────

/// Progress of the descending loop, reported once per count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// The count just finished.
    pub count: u32,
    pub completed: u32,
    pub total: u32,
}

/// Result of assembly: audio plus its timeline, always consistent.
#[derive(Debug)]
pub struct Assembly {
    pub track: Track,
    pub timeline: Vec<TimelineEntry>,
    /// Number of counts that produced speech.
    pub spoken: u32,
}

impl Assembly {
    pub fn duration_ms(&self) -> u64 {
        self.track.duration_ms()
    }
}

/// Run the plan against `cues`. Fails only if a cue cannot be produced, in which
/// case nothing is returned.
pub fn assemble<C, F>(plan: &CountdownPlan, cues: &mut C, mut on_step: F) -> Result<Assembly>
where
    C: CueSource + ?Sized,
    F: FnMut(Step),
{
    let mut rec = TimelineRecorder::new();

    // Shared assets, resolved up front so a dead voice fails before the loop.
    let beep = cues.tone();
    let rest = if plan.rests_enabled() {
        Some(cues.resolve(&plan.rest_text)?)
    } else {
        None
    };

    if let Some(lead) = &plan.lead_in {
        rec.append(lead.as_str(), cues.resolve(lead)?);
        if plan.lead_in_gap_ms > 0 {
            rec.append(LABEL_LEAD_GAP, Segment::silence(plan.lead_in_gap_ms));
        }
    }

    let mut rests_skipped = 0;
    let mut spoken = 0;

    for count in (1..=plan.start).rev() {
        if plan.should_speak(count) {
            let text = plan.phrase(count);
            let segment = cues.resolve(&text)?;
            rec.append(text, segment);
            spoken += 1;
        }

        match plan.boundary(count, rests_skipped) {
            Boundary::Final => {
                if let Some(end) = &plan.end_with {
                    rec.append(end.as_str(), cues.resolve(end)?);
                }
            }
            Boundary::Normal => {
                rec.append(LABEL_BEEP, beep.clone());
                rec.append(LABEL_PAUSE, Segment::silence(plan.gap_ms(count)));
            }
            Boundary::SkippedRest => {
                rests_skipped += 1;
                debug!(count, rests_skipped, "rest suppressed");
                rec.append(LABEL_BEEP_SKIP_REST, beep.clone());
                rec.append(LABEL_PAUSE_SKIP_REST, Segment::silence(plan.gap_ms(count)));
            }
            Boundary::Rest => {
                if let Some(rest) = &rest {
                    rec.append(plan.rest_text.as_str(), rest.clone());
                }
                rec.append(LABEL_BEEP, beep.clone());
                rec.append(LABEL_PAUSE_LONG, Segment::silence(plan.long_interval_ms));
            }
        }

        on_step(Step {
            count,
            completed: plan.start - count + 1,
            total: plan.start,
        });
    }

    let (track, timeline) = rec.finish();
    info!(
        entries = timeline.len(),
        duration_ms = track.duration_ms(),
        spoken,
        "countdown assembled"
    );
    Ok(Assembly {
        track,
        timeline,
        spoken,
    })
}

/// Numbers-mode assembly for `config`, ignoring its mode selector.
pub fn build_numeric<C>(config: &CountdownConfig, cues: &mut C) -> Result<Assembly>
where
    C: CueSource + ?Sized,
{
    assemble(&CountdownPlan::numbers(config), cues, |_| {})
}

/// Minutes-mode assembly for `config`, ignoring its mode selector.
pub fn build_minutes<C>(config: &CountdownConfig, cues: &mut C) -> Result<Assembly>
where
    C: CueSource + ?Sized,
{
    assemble(&CountdownPlan::minutes(config), cues, |_| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildError, SynthesisError};
    use crate::timeline::is_contiguous;
    use std::collections::BTreeSet;

    /// Speech lasts 10 ms per character, the beep 300 ms.
    #[derive(Default)]
    struct FixedCues {
        requested: Vec<String>,
        fail_on: Option<String>,
    }

    impl CueSource for FixedCues {
        fn resolve(&mut self, text: &str) -> Result<Segment> {
            if self.fail_on.as_deref() == Some(text) {
                return Err(BuildError::Synthesis {
                    text: text.to_string(),
                    attempts: 3,
                    source: SynthesisError::EmptyBody,
                });
            }
            self.requested.push(text.to_string());
            Ok(Segment::silence(10 * text.chars().count() as u64))
        }

        fn tone(&mut self) -> Segment {
            Segment::silence(300)
        }
    }

    fn labels(assembly: &Assembly) -> Vec<&str> {
        assembly.timeline.iter().map(|e| e.label.as_str()).collect()
    }

    fn numbers(start: u32, every_n: u32, skip: u32) -> CountdownConfig {
        CountdownConfig {
            start,
            every_n,
            skip_first_rest: skip,
            ..Default::default()
        }
    }

    fn minutes(start: u32, speak: SpeakPolicy) -> CountdownConfig {
        CountdownConfig {
            start,
            mode: Mode::Minutes,
            every_n: 0,
            speak,
            ..Default::default()
        }
    }

    #[test]
    fn numbers_without_rests() {
        let a = build_numeric(&numbers(3, 0, 0), &mut FixedCues::default()).unwrap();
        assert_eq!(labels(&a), vec!["3", "beep", "pause", "2", "beep", "pause", "1"]);
        assert_eq!(a.timeline[2].duration_ms(), 3500);
        assert_eq!(a.spoken, 3);
    }

    #[test]
    fn rest_boundaries_fire_on_multiples() {
        let a = build_numeric(&numbers(5, 2, 0), &mut FixedCues::default()).unwrap();
        assert_eq!(
            labels(&a),
            vec![
                "5", "beep", "pause", "4", "rest", "beep", "pause_long", "3", "beep", "pause",
                "2", "rest", "beep", "pause_long", "1"
            ]
        );
        let long = a.timeline.iter().find(|e| e.label == "pause_long").unwrap();
        assert_eq!(long.duration_ms(), 8000);
    }

    #[test]
    fn first_rest_can_be_suppressed() {
        let a = build_numeric(&numbers(8, 4, 1), &mut FixedCues::default()).unwrap();
        let l = labels(&a);
        // 8 is the first rest boundary and is suppressed; 4 is a real rest.
        let eight = l.iter().position(|x| *x == "8").unwrap();
        assert_eq!(&l[eight + 1..eight + 3], &["beep_skip_rest", "pause_skip_rest"]);
        assert_eq!(a.timeline[eight + 2].duration_ms(), 3500);
        let four = l.iter().position(|x| *x == "4").unwrap();
        assert_eq!(&l[four + 1..four + 4], &["rest", "beep", "pause_long"]);
        assert_eq!(l.iter().filter(|x| **x == "beep_skip_rest").count(), 1);
    }

    #[test]
    fn skip_count_larger_than_rest_count_suppresses_all() {
        let a = build_numeric(&numbers(8, 4, 5), &mut FixedCues::default()).unwrap();
        assert!(!labels(&a).contains(&"rest"));
        assert_eq!(labels(&a).iter().filter(|x| **x == "beep_skip_rest").count(), 2);
    }

    #[test]
    fn lead_in_and_end_phrase() {
        let cfg = CountdownConfig {
            lead_in: Some("Get ready".into()),
            lead_in_gap_ms: 1000,
            end_with: Some("Good job".into()),
            ..numbers(2, 0, 0)
        };
        let a = build_numeric(&cfg, &mut FixedCues::default()).unwrap();
        assert_eq!(
            labels(&a),
            vec!["Get ready", "lead_gap", "2", "beep", "pause", "1", "Good job"]
        );
        assert_eq!(a.timeline[1].start, 90);
        assert_eq!(a.timeline[1].end, 1090);
    }

    #[test]
    fn zero_lead_gap_and_blank_phrases_are_skipped() {
        let cfg = CountdownConfig {
            lead_in: Some("Go".into()),
            lead_in_gap_ms: 0,
            end_with: Some("   ".into()),
            ..numbers(1, 0, 0)
        };
        let a = build_numeric(&cfg, &mut FixedCues::default()).unwrap();
        assert_eq!(labels(&a), vec!["Go", "1"]);
    }

    #[test]
    fn timeline_matches_track() {
        let cfg = CountdownConfig {
            lead_in: Some("Ready".into()),
            end_with: Some("Done".into()),
            ..numbers(17, 4, 1)
        };
        let a = build_numeric(&cfg, &mut FixedCues::default()).unwrap();
        assert!(is_contiguous(&a.timeline));
        assert_eq!(a.timeline.last().unwrap().end, a.duration_ms());
        assert_eq!(a.track.segments().len(), a.timeline.len());
    }

    #[test]
    fn minutes_speaking_every_minute_waits_a_full_minute() {
        let a = build_minutes(&minutes(3, SpeakPolicy::Always), &mut FixedCues::default()).unwrap();
        assert_eq!(
            labels(&a),
            vec![
                "3 minutes remaining",
                "beep",
                "pause",
                "2 minutes remaining",
                "beep",
                "pause",
                "1 minute remaining"
            ]
        );
        for e in a.timeline.iter().filter(|e| e.label == "pause") {
            assert_eq!(e.duration_ms(), MINUTE_MS);
        }
    }

    #[test]
    fn minutes_with_explicit_set_compress_unspoken_steps() {
        let set: BTreeSet<u32> = [5, 1].into_iter().collect();
        let cfg = minutes(5, SpeakPolicy::At(set));
        let a = build_minutes(&cfg, &mut FixedCues::default()).unwrap();
        let spoken: Vec<&str> = labels(&a)
            .into_iter()
            .filter(|l| l.contains("minute"))
            .collect();
        assert_eq!(spoken, vec!["5 minutes remaining", "1 minute remaining"]);
        assert_eq!(a.spoken, 2);

        let pauses: Vec<u64> = a
            .timeline
            .iter()
            .filter(|e| e.label == "pause")
            .map(|e| e.duration_ms())
            .collect();
        assert_eq!(pauses, vec![MINUTE_MS, 3500, 3500, 3500]);
        assert_eq!(labels(&a).iter().filter(|l| **l == "beep").count(), 4);
    }

    #[test]
    fn minutes_interval_policy() {
        let a = build_minutes(&minutes(10, SpeakPolicy::Interval(5)), &mut FixedCues::default())
            .unwrap();
        let spoken: Vec<&str> = labels(&a)
            .into_iter()
            .filter(|l| l.contains("minute"))
            .collect();
        assert_eq!(
            spoken,
            vec!["10 minutes remaining", "5 minutes remaining", "1 minute remaining"]
        );
    }

    #[test]
    fn minutes_skipped_rest_gap_follows_speaking() {
        let cfg = CountdownConfig {
            every_n: 2,
            skip_first_rest: 2,
            ..minutes(4, SpeakPolicy::At([4, 1].into_iter().collect()))
        };
        let a = build_minutes(&cfg, &mut FixedCues::default()).unwrap();
        let skipped: Vec<u64> = a
            .timeline
            .iter()
            .filter(|e| e.label == "pause_skip_rest")
            .map(|e| e.duration_ms())
            .collect();
        // minute 4 is spoken, minute 2 is not
        assert_eq!(skipped, vec![MINUTE_MS, 3500]);
    }

    #[test]
    fn minute_rest_uses_long_interval_regardless_of_speaking() {
        let cfg = CountdownConfig {
            every_n: 2,
            ..minutes(3, SpeakPolicy::Always)
        };
        let a = build_minutes(&cfg, &mut FixedCues::default()).unwrap();
        assert_eq!(
            labels(&a),
            vec![
                "3 minutes remaining",
                "beep",
                "pause",
                "2 minutes remaining",
                "rest",
                "beep",
                "pause_long",
                "1 minute remaining"
            ]
        );
        assert_eq!(a.timeline[6].duration_ms(), 8000);
    }

    #[test]
    fn unspoken_final_minute_still_terminates() {
        let a = build_minutes(
            &minutes(3, SpeakPolicy::At([3].into_iter().collect())),
            &mut FixedCues::default(),
        )
        .unwrap();
        assert_eq!(labels(&a).last(), Some(&"pause"));
        assert_eq!(a.spoken, 1);
    }

    #[test]
    fn rest_cue_not_requested_when_rests_disabled() {
        let mut cues = FixedCues::default();
        build_numeric(&numbers(3, 0, 0), &mut cues).unwrap();
        assert!(!cues.requested.contains(&"rest".to_string()));
    }

    #[test]
    fn synthesis_failure_aborts_without_output() {
        let mut cues = FixedCues {
            fail_on: Some("2".into()),
            ..Default::default()
        };
        let result = build_numeric(&numbers(3, 0, 0), &mut cues);
        assert!(matches!(result, Err(BuildError::Synthesis { .. })));
    }

    #[test]
    fn progress_reports_every_count() {
        let mut steps = Vec::new();
        let plan = CountdownPlan::numbers(&numbers(4, 0, 0));
        assemble(&plan, &mut FixedCues::default(), |s| steps.push(s)).unwrap();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].count, 4);
        assert_eq!(steps[3].completed, 4);
        assert!(steps.iter().all(|s| s.total == 4));
    }

    #[test]
    fn minute_phrase_singularizes() {
        assert_eq!(minute_phrase(2, "minutes remaining"), "2 minutes remaining");
        assert_eq!(minute_phrase(1, "minutes remaining"), "1 minute remaining");
        assert_eq!(minute_phrase(1, "to go"), "1 to go");
        assert_eq!(minute_phrase(3, ""), "3 ");
    }

    #[test]
    fn from_config_picks_variant() {
        let plan = CountdownPlan::from_config(&minutes(3, SpeakPolicy::Always));
        assert_eq!(plan.gap, GapPolicy::MinuteScaled);
        let plan = CountdownPlan::from_config(&numbers(3, 0, 0));
        assert_eq!(plan.gap, GapPolicy::Fixed);
        assert_eq!(plan.speak, SpeakPolicy::Always);
    }
}
