use chrono::{DateTime, TimeDelta, Utc};

/// Source of the local wall clock time.
///
/// The validator reads the clock for every scheduling decision, every probe
/// dispatch and every probe completion. Corrections for the skew between the
/// local clock and the origin server are applied on top of it, never inside.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock anchored to the tokio timer.
///
/// It starts at `origin` and advances with [`tokio::time::Instant`], so it follows
/// virtual time when the runtime clock is paused.
#[derive(Debug, Clone)]
pub struct RuntimeClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl RuntimeClock {
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.started.elapsed()).unwrap_or(TimeDelta::zero());
        self.origin + elapsed
    }
}
