use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Tuning knobs of a validator run.
///
/// Every field has a default, so a configuration file only has to name the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Period of the scheduler tick, in milliseconds.
    pub tick_interval_ms: u64,
    /// Checks due sooner than this are armed on a one-shot timer instead of waiting for a tick.
    pub near_term_threshold_ms: u64,
    /// How many already-due start checks may be issued when the run starts.
    pub past_due_budget: usize,
    /// Upper bound of already-available segments kept eligible for probing per representation.
    pub max_retained_past_segments: u64,
    pub rtt_window: usize,
    pub skew_window: usize,
    /// Mean clock skew below this magnitude is not corrected.
    pub skew_deadzone_ms: u64,
    pub clock_skew_correction: bool,
    /// End checks are issued this much before the availability end time.
    pub end_check_lead_ms: u64,
    /// A `minimumUpdatePeriod` at or above this marks the manifest as static.
    pub refresh_ceiling_secs: u64,
    /// Delay before retrying a failed fetch when no update period is known.
    pub fallback_refresh_ms: u64,
    pub refresh_history: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            near_term_threshold_ms: 2000,
            past_due_budget: 1,
            max_retained_past_segments: 100,
            rtt_window: 10,
            skew_window: 10,
            skew_deadzone_ms: 500,
            clock_skew_correction: true,
            end_check_lead_ms: 0,
            refresh_ceiling_secs: 3600,
            fallback_refresh_ms: 2000,
            refresh_history: 5,
        }
    }
}

impl ValidatorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn near_term_threshold(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.near_term_threshold_ms as i64)
    }

    pub fn end_check_lead(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.end_check_lead_ms as i64)
    }

    pub fn refresh_ceiling(&self) -> TimeDelta {
        TimeDelta::seconds(self.refresh_ceiling_secs as i64)
    }

    pub fn fallback_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_refresh_ms)
    }
}
