//! The live segment model a validator run owns and mutates.
use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use url::Url;

use crate::{
    manifest::{
        DEFAULT_MIN_BUFFER_TIME_SECS, DEFAULT_SUGGESTED_PRESENTATION_DELAY_SECS,
        DEFAULT_TIME_SHIFT_BUFFER_DEPTH_SECS,
    },
    MadoResult,
};

/// Which end of the availability window a check verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// The segment must be retrievable from its availability start time.
    Start,
    /// The segment must still be retrievable at its availability end time.
    End,
}

impl CheckKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "SAS",
            Self::End => "SAE",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of an issued probe, carried by the task issuing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProbeRef {
    pub period: usize,
    pub adaptation_set: usize,
    pub representation: usize,
    pub segment: u64,
    pub kind: CheckKind,
}

impl fmt::Display for ProbeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} (period {}, adaptation set {}, representation {})",
            self.kind, self.segment, self.period, self.adaptation_set, self.representation
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Available { status: u16 },
    Unavailable {
        status: Option<u16>,
        reason: Option<String>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// State of one side (start or end) of a segment's availability window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityCheck {
    pub availability_time: DateTime<Utc>,
    /// Clock skew correction in effect when the check was scheduled.
    pub correction: Option<TimeDelta>,
    pub dispatched: bool,
    pub past_due: bool,
    /// Raw local time the probe left.
    pub issued_at: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
}

impl AvailabilityCheck {
    fn new(availability_time: DateTime<Utc>) -> Self {
        Self {
            availability_time,
            correction: None,
            dispatched: false,
            past_due: false,
            issued_at: None,
            outcome: None,
        }
    }

    /// Returns `false` if the check had already been dispatched.
    pub(crate) fn mark_dispatched(&mut self, correction: TimeDelta, past_due: bool) -> bool {
        if self.dispatched {
            return false;
        }
        self.dispatched = true;
        self.correction = Some(correction);
        self.past_due = past_due;
        true
    }

    pub(crate) fn mark_issued(&mut self, at: DateTime<Utc>) {
        self.issued_at.get_or_insert(at);
    }

    /// Returns `false` if an outcome was recorded before.
    pub(crate) fn record_outcome(&mut self, outcome: Outcome) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCheck {
    pub number: u64,
    /// Media location with every template identifier substituted.
    pub location: String,
    /// Duration of the segment, used by the retention guarantee.
    pub duration: TimeDelta,
    pub start: AvailabilityCheck,
    pub end: AvailabilityCheck,
}

impl SegmentCheck {
    pub fn new(
        number: u64,
        location: String,
        availability_start: DateTime<Utc>,
        time_shift_buffer_depth: TimeDelta,
        duration: TimeDelta,
    ) -> Self {
        Self {
            number,
            location,
            duration,
            start: AvailabilityCheck::new(availability_start),
            end: AvailabilityCheck::new(availability_start + time_shift_buffer_depth),
        }
    }

    pub fn url(&self) -> MadoResult<Url> {
        Ok(Url::parse(&self.location)?)
    }

    pub fn check(&self, kind: CheckKind) -> &AvailabilityCheck {
        match kind {
            CheckKind::Start => &self.start,
            CheckKind::End => &self.end,
        }
    }

    pub fn check_mut(&mut self, kind: CheckKind) -> &mut AvailabilityCheck {
        match kind {
            CheckKind::Start => &mut self.start,
            CheckKind::End => &mut self.end,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckCounters {
    pub dispatched: u64,
    pub processed: u64,
}

impl CheckCounters {
    pub fn outstanding(&self) -> u64 {
        self.dispatched.saturating_sub(self.processed)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepresentationCounters {
    pub start: CheckCounters,
    pub end: CheckCounters,
}

impl RepresentationCounters {
    pub fn get(&self, kind: CheckKind) -> &CheckCounters {
        match kind {
            CheckKind::Start => &self.start,
            CheckKind::End => &self.end,
        }
    }

    pub fn get_mut(&mut self, kind: CheckKind) -> &mut CheckCounters {
        match kind {
            CheckKind::Start => &mut self.start,
            CheckKind::End => &mut self.end,
        }
    }

    pub fn outstanding(&self) -> u64 {
        self.start.outstanding() + self.end.outstanding()
    }
}

impl std::ops::AddAssign for RepresentationCounters {
    fn add_assign(&mut self, rhs: Self) {
        self.start.dispatched += rhs.start.dispatched;
        self.start.processed += rhs.start.processed;
        self.end.dispatched += rhs.end.dispatched;
        self.end.processed += rhs.end.processed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressingMode {
    NumberTemplate,
    TimelineTemplate,
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub id: Option<String>,
    pub bandwidth: Option<u64>,
    pub mode: AddressingMode,
    /// Nominal segment duration in seconds. For timeline addressing this is the duration
    /// of the newest segment seen.
    pub segment_duration: f64,
    pub start_number: u64,
    pub greatest_segment_number: u64,
    pub first_retained_segment: u64,
    /// Latest segment presumed available at the last refresh.
    pub latest_segment_number: Option<u64>,
    pub segments: BTreeMap<u64, SegmentCheck>,
    pub counters: RepresentationCounters,
}

impl Representation {
    pub fn new(id: Option<String>, mode: AddressingMode, start_number: u64) -> Self {
        Self {
            id,
            bandwidth: None,
            mode,
            segment_duration: 0.0,
            start_number,
            greatest_segment_number: start_number.saturating_sub(1),
            first_retained_segment: start_number,
            latest_segment_number: None,
            segments: BTreeMap::new(),
            counters: RepresentationCounters::default(),
        }
    }

    /// Segments at or above the retained floor, oldest first.
    pub fn retained(&self) -> impl DoubleEndedIterator<Item = &SegmentCheck> {
        self.segments
            .range(self.first_retained_segment..)
            .map(|(_, segment)| segment)
    }

    pub fn segment(&self, number: u64) -> Option<&SegmentCheck> {
        self.segments.get(&number)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptationSet {
    pub content_type: Option<String>,
    pub representations: Vec<Representation>,
}

#[derive(Debug, Clone)]
pub struct Period {
    /// Assigned once, never changed afterwards.
    pub id: Option<String>,
    pub start: TimeDelta,
    pub adaptation_sets: Vec<AdaptationSet>,
}

/// The manifest as accumulated over all refreshes of a run.
#[derive(Debug, Clone)]
pub struct LiveManifest {
    pub availability_start_time: DateTime<Utc>,
    pub publish_time: Option<DateTime<Utc>>,
    pub minimum_update_period: Option<TimeDelta>,
    pub time_shift_buffer_depth: TimeDelta,
    pub suggested_presentation_delay: TimeDelta,
    pub min_buffer_time: TimeDelta,
    /// Corrected local time of the last successful fetch.
    pub fetch_time: Option<DateTime<Utc>>,
    pub periods: Vec<Period>,
}

impl Default for LiveManifest {
    fn default() -> Self {
        Self {
            availability_start_time: DateTime::UNIX_EPOCH,
            publish_time: None,
            minimum_update_period: None,
            time_shift_buffer_depth: TimeDelta::seconds(DEFAULT_TIME_SHIFT_BUFFER_DEPTH_SECS),
            suggested_presentation_delay: TimeDelta::seconds(
                DEFAULT_SUGGESTED_PRESENTATION_DELAY_SECS,
            ),
            min_buffer_time: TimeDelta::seconds(DEFAULT_MIN_BUFFER_TIME_SECS),
            fetch_time: None,
            periods: Vec::new(),
        }
    }
}

impl LiveManifest {
    pub fn representation(&self, probe: &ProbeRef) -> Option<&Representation> {
        self.periods
            .get(probe.period)?
            .adaptation_sets
            .get(probe.adaptation_set)?
            .representations
            .get(probe.representation)
    }

    pub fn representation_mut(&mut self, probe: &ProbeRef) -> Option<&mut Representation> {
        self.periods
            .get_mut(probe.period)?
            .adaptation_sets
            .get_mut(probe.adaptation_set)?
            .representations
            .get_mut(probe.representation)
    }

    pub fn segment(&self, probe: &ProbeRef) -> Option<&SegmentCheck> {
        self.representation(probe)?.segment(probe.segment)
    }

    pub fn segment_mut(&mut self, probe: &ProbeRef) -> Option<&mut SegmentCheck> {
        self.representation_mut(probe)?
            .segments
            .get_mut(&probe.segment)
    }

    pub fn representations(&self) -> impl Iterator<Item = &Representation> {
        self.periods
            .iter()
            .flat_map(|p| p.adaptation_sets.iter())
            .flat_map(|a| a.representations.iter())
    }

    /// Counters summed over every representation.
    pub fn totals(&self) -> RepresentationCounters {
        let mut totals = RepresentationCounters::default();
        for representation in self.representations() {
            totals += representation.counters;
        }
        totals
    }
}
