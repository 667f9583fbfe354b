//! Availability arithmetic of number- and timeline-addressed segments.
//!
//! References:
//! - [DASH-IF implementation guidelines: restricted timing model](https://dashif.org/Guidelines-TimingModel)
//! - ISO/IEC 23009-1, 5.3.9.5.3 Media Segment information
mod timeline;

pub use timeline::{expand_timeline, SampleTimeline, TimelineEntry, TimelineSegment};

use chrono::{DateTime, TimeDelta, Utc};

pub(crate) trait TimeDeltaExt {
    /// Signed, microsecond precision conversion from fractional seconds.
    fn seconds_f64(secs: f64) -> TimeDelta;

    fn as_millis_f64(&self) -> f64;
}

impl TimeDeltaExt for TimeDelta {
    fn seconds_f64(secs: f64) -> TimeDelta {
        TimeDelta::microseconds((secs * 1_000_000.0).round() as i64)
    }

    fn as_millis_f64(&self) -> f64 {
        match self.num_microseconds() {
            Some(micros) => micros as f64 / 1000.0,
            None => self.num_milliseconds() as f64,
        }
    }
}

/// Timing context of one representation inside one period.
///
/// `period_anchor` is `AST + PS`, the wall clock instant the period starts at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    pub period_anchor: DateTime<Utc>,
    /// Nominal segment duration `d`, in seconds.
    pub segment_duration: f64,
    pub start_number: u64,
    pub time_shift_buffer_depth: TimeDelta,
    pub suggested_presentation_delay: TimeDelta,
    pub min_buffer_time: TimeDelta,
}

impl SegmentTiming {
    fn elapsed(&self, at: DateTime<Utc>) -> f64 {
        (at - self.period_anchor).as_seconds_f64()
    }

    /// Number of the latest segment presumed available at `fetch_time`.
    ///
    /// `LSN = floor((FT - (AST + PS) - d) / d) + SSN`
    pub fn latest_segment_number(&self, fetch_time: DateTime<Utc>) -> i64 {
        let d = self.segment_duration;
        ((self.elapsed(fetch_time) - d) / d).floor() as i64 + self.start_number as i64
    }

    /// Number of the greatest segment that may become available before the next refresh.
    ///
    /// `GSN = ceil((FT + MUP - (AST + PS) - d) / d) + SSN`
    pub fn greatest_segment_number(
        &self,
        fetch_time: DateTime<Utc>,
        minimum_update_period: TimeDelta,
    ) -> i64 {
        let d = self.segment_duration;
        let horizon = self.elapsed(fetch_time) + minimum_update_period.as_seconds_f64();
        ((horizon - d) / d).ceil() as i64 + self.start_number as i64
    }

    /// `SAST(SN) = AST + PS + (SN - SSN + 1) * d`
    pub fn availability_start_time(&self, number: u64) -> DateTime<Utc> {
        let index = number as i64 - self.start_number as i64 + 1;
        self.period_anchor + TimeDelta::seconds_f64(index as f64 * self.segment_duration)
    }

    /// `SAET(SN) = SAST(SN) + TSBD`
    pub fn availability_end_time(&self, number: u64) -> DateTime<Utc> {
        self.availability_start_time(number) + self.time_shift_buffer_depth
    }

    /// Availability start of a segment whose nominal start offset inside the period is known,
    /// as produced by walking a SegmentTimeline.
    pub fn availability_start_at(&self, offset: TimeDelta) -> DateTime<Utc> {
        self.period_anchor + offset
    }

    /// Instant a client playing with the suggested presentation delay presents
    /// `presentation_time`.
    pub fn synchronized_playout(&self, presentation_time: TimeDelta) -> DateTime<Utc> {
        self.period_anchor + presentation_time + self.suggested_presentation_delay
    }

    /// Instant a segment delivered from its availability start over a constant-bitrate
    /// channel has fully arrived, given it starts presenting at `presentation_time`.
    pub fn delivery_deadline(&self, presentation_time: TimeDelta) -> DateTime<Utc> {
        self.period_anchor + presentation_time + self.min_buffer_time
    }

    /// Whether segment `number` is available before it is presented at `presentation_time`
    /// by a synchronized client.
    pub fn is_available_before_presentation(
        &self,
        number: u64,
        presentation_time: TimeDelta,
    ) -> bool {
        self.availability_start_time(number) <= self.synchronized_playout(presentation_time)
    }

    /// Instant until which segment `number` must stay retrievable.
    pub fn guaranteed_until(&self, number: u64) -> DateTime<Utc> {
        self.availability_end_time(number) + TimeDelta::seconds_f64(self.segment_duration)
    }
}
