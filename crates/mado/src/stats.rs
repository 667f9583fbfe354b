//! Round-trip time and clock skew statistics.
//!
//! Skew observations feed a correction offset back into scheduling: every "now" the
//! scheduler reads is the raw local clock minus that offset.
mod ring;

pub use ring::RingBuffer;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::{config::ValidatorConfig, model::CheckKind, timing::TimeDeltaExt};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RttSummary {
    pub mean_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone)]
pub struct RttEstimator {
    samples: RingBuffer<f64>,
}

impl RttEstimator {
    pub fn new(window: usize) -> Self {
        Self {
            samples: RingBuffer::with_capacity(window),
        }
    }

    pub fn record(&mut self, round_trip: TimeDelta) {
        self.samples.push(round_trip.as_millis_f64());
    }

    pub fn summary(&self) -> Option<RttSummary> {
        Some(RttSummary {
            mean_ms: self.samples.mean()?,
            max_ms: self.samples.max()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClockSkewEstimator {
    samples: RingBuffer<f64>,
    deadzone_ms: f64,
}

impl ClockSkewEstimator {
    pub fn new(window: usize, deadzone_ms: f64) -> Self {
        Self {
            samples: RingBuffer::with_capacity(window),
            deadzone_ms,
        }
    }

    /// Records the skew between the local clock and a server-reported response time.
    ///
    /// The server time is compared to the midpoint of the raw dispatch and completion
    /// instants. Returns the observation in milliseconds; positive means the local clock
    /// is ahead of the server.
    pub fn observe(
        &mut self,
        dispatched_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        server_time: DateTime<Utc>,
    ) -> f64 {
        let midpoint = dispatched_at + (completed_at - dispatched_at) / 2;
        let skew_ms = (midpoint - server_time).as_millis_f64();
        self.record(skew_ms);
        skew_ms
    }

    pub fn record(&mut self, skew_ms: f64) {
        self.samples.push(skew_ms);
    }

    pub fn mean(&self) -> Option<f64> {
        self.samples.mean()
    }

    /// Mean skew passed through the deadzone, in milliseconds.
    pub fn correction_ms(&self) -> f64 {
        self.mean()
            .map(|mean| apply_deadzone(mean, self.deadzone_ms))
            .unwrap_or(0.0)
    }
}

/// Offsets within `±deadzone` become zero, larger ones shrink towards zero by `deadzone`.
pub fn apply_deadzone(offset: f64, deadzone: f64) -> f64 {
    if offset > deadzone {
        offset - deadzone
    } else if offset < -deadzone {
        offset + deadzone
    } else {
        0.0
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SuccessCounters {
    pub start: u64,
    pub end: u64,
}

impl SuccessCounters {
    pub fn get(&self, kind: CheckKind) -> u64 {
        match kind {
            CheckKind::Start => self.start,
            CheckKind::End => self.end,
        }
    }
}

/// Everything the correlator learns from completed probes.
#[derive(Debug, Clone)]
pub struct Statistics {
    pub rtt: RttEstimator,
    pub skew: ClockSkewEstimator,
    pub successes: SuccessCounters,
    correction_enabled: bool,
}

impl Statistics {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            rtt: RttEstimator::new(config.rtt_window),
            skew: ClockSkewEstimator::new(config.skew_window, config.skew_deadzone_ms as f64),
            successes: SuccessCounters::default(),
            correction_enabled: config.clock_skew_correction,
        }
    }

    pub fn record_success(&mut self, kind: CheckKind) {
        match kind {
            CheckKind::Start => self.successes.start += 1,
            CheckKind::End => self.successes.end += 1,
        }
    }

    /// Offset subtracted from the raw local clock, zero when correction is disabled.
    pub fn correction(&self) -> TimeDelta {
        if self.correction_enabled {
            TimeDelta::seconds_f64(self.skew.correction_ms() / 1000.0)
        } else {
            TimeDelta::zero()
        }
    }

    pub fn corrected(&self, raw: DateTime<Utc>) -> DateTime<Utc> {
        raw - self.correction()
    }
}
