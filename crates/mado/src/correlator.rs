//! Matches probe completions back to the checks they were issued for.
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{
    model::{CheckKind, LiveManifest, Outcome, ProbeRef},
    probe::ProbeResponse,
    stats::Statistics,
    timing::TimeDeltaExt,
    MadoError, MadoResult,
};

#[derive(Debug)]
pub struct ProbeCompletion {
    pub probe: ProbeRef,
    /// Raw local time the response arrived.
    pub completed_at: DateTime<Utc>,
    pub result: MadoResult<ProbeResponse>,
}

/// Outcome record of one availability check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub probe: ProbeRef,
    pub url: String,
    pub availability_time: DateTime<Utc>,
    pub past_due: bool,
    pub outcome: Outcome,
    pub server_time: Option<DateTime<Utc>>,
    pub round_trip_ms: f64,
    pub clock_skew_ms: Option<f64>,
    pub suspected_clock_skew: bool,
}

pub fn correlate(
    manifest: &mut LiveManifest,
    statistics: &mut Statistics,
    completion: ProbeCompletion,
) -> MadoResult<CheckReport> {
    let ProbeCompletion {
        probe,
        completed_at,
        result,
    } = completion;

    let representation = manifest
        .representation_mut(&probe)
        .ok_or(MadoError::UnmatchedProbe(probe))?;
    let segment = representation
        .segments
        .get_mut(&probe.segment)
        .ok_or(MadoError::UnmatchedProbe(probe))?;

    let url = segment.location.clone();
    let start = segment.start.availability_time;
    let end = segment.end.availability_time;
    let duration = segment.duration;

    let (outcome, server_time) = match result {
        Ok(response) if response.is_success() => (
            Outcome::Available {
                status: response.status,
            },
            response.server_time,
        ),
        Ok(response) => (
            Outcome::Unavailable {
                status: Some(response.status),
                reason: None,
            },
            response.server_time,
        ),
        Err(e) => (
            Outcome::Unavailable {
                status: None,
                reason: Some(e.to_string()),
            },
            None,
        ),
    };

    let check = segment.check_mut(probe.kind);
    if !check.record_outcome(outcome.clone()) {
        return Err(MadoError::DuplicateCompletion(probe));
    }
    let past_due = check.past_due;
    let availability_time = check.availability_time;
    let issued_at = check.issued_at.unwrap_or(completed_at);
    representation.counters.get_mut(probe.kind).processed += 1;

    let round_trip = completed_at - issued_at;
    if !past_due {
        statistics.rtt.record(round_trip);
    }
    if outcome.is_success() {
        statistics.record_success(probe.kind);
    }
    let clock_skew_ms =
        server_time.map(|server_time| statistics.skew.observe(issued_at, completed_at, server_time));

    let suspected_clock_skew = !outcome.is_success()
        && server_time.is_some_and(|server_time| {
            suspect_clock_skew(probe.kind, server_time, start, end, duration)
        });

    Ok(CheckReport {
        probe,
        url,
        availability_time,
        past_due,
        outcome,
        server_time,
        round_trip_ms: round_trip.as_millis_f64(),
        clock_skew_ms,
        suspected_clock_skew,
    })
}

/// Whether a failed check is better explained by clock skew than by the origin.
///
/// A start check fails under skew when the server has not reached the availability start
/// yet. An end check does so as well, or when the server is past the retention guarantee
/// `SAET + d`.
///
/// A failed end check whose server time lies in `(SAET, SAET + d]` is not flagged: the
/// segment must still be retrievable there, so the failure is a genuine violation.
pub fn suspect_clock_skew(
    kind: CheckKind,
    server_time: DateTime<Utc>,
    availability_start: DateTime<Utc>,
    availability_end: DateTime<Utc>,
    duration: TimeDelta,
) -> bool {
    match kind {
        CheckKind::Start => server_time < availability_start,
        CheckKind::End => {
            server_time < availability_start || server_time > availability_end + duration
        }
    }
}
