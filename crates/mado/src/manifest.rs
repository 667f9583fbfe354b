//! Decoded manifest snapshots.
//!
//! A [ManifestSnapshot] is what one manifest fetch yields after attribute decoding,
//! BaseURL resolution and SegmentTemplate inheritance. It never replaces the live model
//! directly, see [crate::merge].
mod mpd;
pub mod template;
pub(crate) mod url;

use chrono::{DateTime, TimeDelta, Utc};

use crate::timing::{SampleTimeline, TimelineEntry};
use template::TemplateUrl;

/// `MPD@timeShiftBufferDepth` when the attribute is absent: the buffer is treated as infinite.
pub const DEFAULT_TIME_SHIFT_BUFFER_DEPTH_SECS: i64 = 86_400_000;
pub const DEFAULT_SUGGESTED_PRESENTATION_DELAY_SECS: i64 = 5;
pub const DEFAULT_MIN_BUFFER_TIME_SECS: i64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestSnapshot {
    pub availability_start_time: DateTime<Utc>,
    pub publish_time: Option<DateTime<Utc>>,
    pub minimum_update_period: Option<TimeDelta>,
    pub time_shift_buffer_depth: Option<TimeDelta>,
    pub suggested_presentation_delay: Option<TimeDelta>,
    pub min_buffer_time: Option<TimeDelta>,
    /// The first period of the manifest, the only one that is validated.
    pub period: PeriodSnapshot,
    /// Number of periods following the first one.
    pub ignored_periods: usize,
}

impl ManifestSnapshot {
    pub fn effective_time_shift_buffer_depth(&self) -> TimeDelta {
        self.time_shift_buffer_depth
            .unwrap_or_else(|| TimeDelta::seconds(DEFAULT_TIME_SHIFT_BUFFER_DEPTH_SECS))
    }

    pub fn effective_suggested_presentation_delay(&self) -> TimeDelta {
        self.suggested_presentation_delay
            .unwrap_or_else(|| TimeDelta::seconds(DEFAULT_SUGGESTED_PRESENTATION_DELAY_SECS))
    }

    pub fn effective_min_buffer_time(&self) -> TimeDelta {
        self.min_buffer_time
            .unwrap_or_else(|| TimeDelta::seconds(DEFAULT_MIN_BUFFER_TIME_SECS))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodSnapshot {
    pub id: Option<String>,
    /// Offset of the period start from the availability start time.
    pub start: TimeDelta,
    pub adaptation_sets: Vec<AdaptationSetSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationSetSnapshot {
    pub content_type: Option<String>,
    pub representations: Vec<RepresentationSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepresentationSnapshot {
    pub id: Option<String>,
    pub bandwidth: Option<u64>,
    /// Media URL template, already resolved against every enclosing BaseURL.
    pub media: TemplateUrl,
    pub start_number: u64,
    pub addressing: Addressing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Addressing {
    /// SegmentTemplate with `@duration`: segments have a nominal duration and are
    /// located by `$Number$`.
    Number { duration: f64, timescale: u64 },
    /// SegmentTemplate with a SegmentTimeline describing every segment explicitly.
    Timeline {
        sample_timeline: SampleTimeline,
        entries: Vec<TimelineEntry>,
    },
}
