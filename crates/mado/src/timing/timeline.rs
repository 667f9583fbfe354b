use chrono::TimeDelta;

use super::TimeDeltaExt;
use crate::{MadoError, MadoResult};

/// One `S` element of a SegmentTimeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    /// `S@t`, the sample-timeline start of the first segment of this run
    pub time: Option<u64>,
    /// `S@d`
    pub duration: u64,
    /// `S@r`, the number of additional segments with the same duration
    pub repeat_count: Option<i64>,
}

/// A segment produced by walking a SegmentTimeline, in sample-timeline units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineSegment {
    pub time: u64,
    pub duration: u64,
}

/// https://dashif.org/Guidelines-TimingModel/#timing-sampletimeline
///
/// > The samples within a representation exist on a linear sample timeline defined by the
/// > encoder that creates the samples. Sample timelines are mapped onto the MPD timeline by
/// > metadata stored in or referenced by the MPD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTimeline {
    pub timescale: u64,
    pub presentation_time_offset: u64,
}

impl SampleTimeline {
    /// Offset from the period start of a point on the sample timeline.
    pub fn offset_of(&self, point: u64) -> TimeDelta {
        let ticks = i128::from(point) - i128::from(self.presentation_time_offset);
        TimeDelta::seconds_f64(ticks as f64 / self.timescale.max(1) as f64)
    }

    pub fn duration_of(&self, ticks: u64) -> TimeDelta {
        TimeDelta::seconds_f64(ticks as f64 / self.timescale.max(1) as f64)
    }
}

/// Upper bound of segments a single SegmentTimeline may expand to.
pub const MAX_TIMELINE_SEGMENTS: u64 = 1 << 20;

/// Walks the run-length encoded timeline.
///
/// An omitted `S@t` continues from the end of the previous run, or from zero for the first one.
/// Runs with a negative repeat count continue until the next `S` or the end of the period, which
/// can not be resolved without guessing and fails with [MadoError::OpenEndedTimeline].
pub fn expand_timeline(
    representation: Option<&str>,
    entries: &[TimelineEntry],
) -> MadoResult<Vec<TimelineSegment>> {
    if let Some(repeat) = entries
        .iter()
        .filter_map(|e| e.repeat_count)
        .find(|r| *r < 0)
    {
        return Err(MadoError::OpenEndedTimeline {
            representation: representation.map(str::to_string),
            repeat,
        });
    }

    let label = representation.unwrap_or("<unnamed>");
    let mut segments = Vec::new();
    let mut current_time: u64 = 0;
    for entry in entries {
        if let Some(time) = entry.time {
            current_time = time;
        }

        let repeat = entry.repeat_count.unwrap_or(0) as u64;
        if repeat >= MAX_TIMELINE_SEGMENTS - segments.len() as u64 {
            return Err(MadoError::MpdParsing(format!(
                "SegmentTimeline of representation {label} expands to more than {MAX_TIMELINE_SEGMENTS} segments"
            )));
        }
        for _ in 0..=repeat {
            segments.push(TimelineSegment {
                time: current_time,
                duration: entry.duration,
            });
            current_time = current_time.checked_add(entry.duration).ok_or_else(|| {
                MadoError::MpdParsing(format!(
                    "SegmentTimeline of representation {label} overflows the sample timeline"
                ))
            })?;
        }
    }

    Ok(segments)
}
