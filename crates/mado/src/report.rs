use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{correlator::CheckReport, model::ProbeRef, stats::RttSummary};

/// Everything a run tells its observer, in the order it happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Report {
    Check(CheckReport),
    Refresh(RefreshEvent),
    RefreshFailed {
        fetch_time: DateTime<Utc>,
        error: String,
    },
    /// The manifest has more than one period; only the first one is validated.
    IgnoredPeriods { count: usize },
    ScheduleFault { probe: ProbeRef, error: String },
    Unmatched { probe: ProbeRef, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshEvent {
    pub fetch_time: DateTime<Utc>,
    pub publish_time: Option<DateTime<Utc>>,
    pub new_segments: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckTotals {
    pub dispatched: u64,
    pub processed: u64,
    pub successful: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub start: CheckTotals,
    pub end: CheckTotals,
    pub round_trip: Option<RttSummary>,
    pub mean_clock_skew_ms: Option<f64>,
    pub correction_ms: f64,
    /// Most recent refreshes, oldest first.
    pub refreshes: Vec<RefreshEvent>,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, totals) in [("Start", &self.start), ("End", &self.end)] {
            writeln!(
                f,
                "{label} checks: {} processed / {} dispatched, {} successful",
                totals.processed, totals.dispatched, totals.successful
            )?;
        }
        match &self.round_trip {
            Some(rtt) => writeln!(f, "RTT: mean {:.0}ms, max {:.0}ms", rtt.mean_ms, rtt.max_ms)?,
            None => writeln!(f, "RTT: no samples")?,
        }
        match self.mean_clock_skew_ms {
            Some(skew) => writeln!(
                f,
                "Clock skew: mean {skew:.0}ms, correction {:.0}ms",
                self.correction_ms
            )?,
            None => writeln!(f, "Clock skew: no samples")?,
        }
        for refresh in &self.refreshes {
            write!(f, "Fetch: {}", refresh.fetch_time.to_rfc3339())?;
            if let Some(publish_time) = refresh.publish_time {
                write!(f, ", Publish: {}", publish_time.to_rfc3339())?;
            }
            writeln!(f, ", {} new segments", refresh.new_segments)?;
        }
        Ok(())
    }
}
