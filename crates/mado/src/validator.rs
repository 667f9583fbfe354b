//! The event loop driving one validation run.
//!
//! A single task owns the [LiveManifest] and mutates it in response to four kinds of
//! events: a manifest refresh coming due, a scheduler tick, a one-shot timer firing and
//! a probe completing. Probes and timers run in their own spawned tasks and report back
//! through one channel, so every mutation of the model happens in a total order.
use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{Clock, SystemClock},
    config::ValidatorConfig,
    correlator::{correlate, ProbeCompletion},
    merge::{merge_snapshot, MergeOptions},
    model::{CheckKind, LiveManifest, Outcome},
    probe::Prober,
    report::{CheckTotals, Progress, RefreshEvent, Report},
    scheduler::{Dispatch, Scheduler},
    source::ManifestSource,
    stats::{RingBuffer, Statistics},
    timing::TimeDeltaExt,
    MadoError, MadoResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestState {
    Idle,
    Fetching,
    Parsed,
    /// The last fetch failed. The previous model and every scheduled check are kept.
    Failed,
}

enum Event {
    Due(Dispatch),
    Completed(ProbeCompletion),
}

pub struct Validator<S, P> {
    source: S,
    prober: Arc<P>,
    clock: Arc<dyn Clock>,
    config: ValidatorConfig,

    manifest: LiveManifest,
    scheduler: Scheduler,
    statistics: Statistics,
    state: ManifestState,
    history: RingBuffer<RefreshEvent>,

    next_refresh: Option<Instant>,
    refreshed_once: bool,
    /// Checks the last scheduler pass left waiting.
    pending: usize,

    reports: mpsc::UnboundedSender<Report>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
}

impl<S, P> Validator<S, P>
where
    S: ManifestSource,
    P: Prober + Send + Sync + 'static,
{
    /// Creates a validator and the stream its reports are delivered on.
    pub fn new(
        source: S,
        prober: P,
        config: ValidatorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Report>) {
        let (reports, receiver) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let validator = Self {
            source,
            prober: Arc::new(prober),
            clock: Arc::new(SystemClock),
            scheduler: Scheduler::new(&config),
            statistics: Statistics::new(&config),
            history: RingBuffer::with_capacity(config.refresh_history),
            config,

            manifest: LiveManifest::default(),
            state: ManifestState::Idle,

            next_refresh: None,
            refreshed_once: false,
            pending: 0,

            reports,
            events_tx,
            events_rx,
        };
        (validator, receiver)
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn manifest(&self) -> &LiveManifest {
        &self.manifest
    }

    pub fn state(&self) -> ManifestState {
        self.state
    }

    pub fn progress(&self) -> Progress {
        let totals = self.manifest.totals();
        let check_totals = |kind: CheckKind| CheckTotals {
            dispatched: totals.get(kind).dispatched,
            processed: totals.get(kind).processed,
            successful: self.statistics.successes.get(kind),
        };

        Progress {
            start: check_totals(CheckKind::Start),
            end: check_totals(CheckKind::End),
            round_trip: self.statistics.rtt.summary(),
            mean_clock_skew_ms: self.statistics.skew.mean(),
            correction_ms: self.statistics.correction().as_millis_f64(),
            refreshes: self.history.iter().cloned().collect(),
        }
    }

    /// Runs until the manifest turns static and every scheduled check has an outcome,
    /// until `token` is cancelled, or until a fatal error.
    pub async fn run(mut self, token: CancellationToken) -> MadoResult<Progress> {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !token.is_cancelled() {
            self.refresh().await?;
            ticker.reset();
        }

        loop {
            if self.is_finished() {
                tracing::info!("Manifest is static and every check has completed");
                break;
            }

            let refresh_at = self.next_refresh;
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Validation cancelled");
                    break;
                }
                _ = sleep_until(refresh_at) => {
                    self.refresh().await?;
                    ticker.reset();
                }
                _ = ticker.tick() => self.dispatch_pass(),
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        Ok(self.progress())
    }

    fn is_finished(&self) -> bool {
        self.refreshed_once
            && self.next_refresh.is_none()
            && self.pending == 0
            && self.manifest.totals().outstanding() == 0
    }

    async fn refresh(&mut self) -> MadoResult<()> {
        self.state = ManifestState::Fetching;
        tracing::debug!("Fetching manifest");
        let fetched = self.source.fetch().await;
        let fetch_time = self.statistics.corrected(self.clock.now());

        let merged = fetched.and_then(|snapshot| {
            let options = MergeOptions {
                fetch_time,
                refresh_ceiling: self.config.refresh_ceiling(),
                max_retained_past_segments: self.config.max_retained_past_segments,
            };
            merge_snapshot(&mut self.manifest, &snapshot, &options)
        });
        let merged = match merged {
            Ok(merged) => merged,
            Err(e) => return self.fail_refresh(fetch_time, e),
        };

        self.state = ManifestState::Parsed;
        self.refreshed_once = true;
        tracing::info!(
            fetch_time = %fetch_time,
            publish_time = ?merged.publish_time,
            new_segments = merged.new_segments,
            "Manifest refreshed"
        );

        let event = RefreshEvent {
            fetch_time,
            publish_time: merged.publish_time,
            new_segments: merged.new_segments,
        };
        self.history.push(event.clone());
        self.emit(Report::Refresh(event));
        if merged.ignored_periods > 0 {
            self.emit(Report::IgnoredPeriods {
                count: merged.ignored_periods,
            });
        }

        self.next_refresh = match self.refresh_interval() {
            Some(interval) => Some(Instant::now() + interval.max(self.config.tick_interval())),
            None => {
                tracing::info!("Manifest is static, no further refresh is scheduled");
                None
            }
        };

        self.dispatch_pass();
        Ok(())
    }

    fn fail_refresh(
        &mut self,
        fetch_time: chrono::DateTime<chrono::Utc>,
        error: MadoError,
    ) -> MadoResult<()> {
        self.state = ManifestState::Failed;
        self.emit(Report::RefreshFailed {
            fetch_time,
            error: error.to_string(),
        });

        if error.is_fatal() {
            tracing::error!(error = %error, "Manifest can not be validated");
            return Err(error);
        }

        let retry = self
            .refresh_interval()
            .unwrap_or_else(|| self.config.fallback_refresh_interval());
        tracing::warn!(error = %error, ?retry, "Failed to refresh manifest");
        self.next_refresh = Some(Instant::now() + retry);
        Ok(())
    }

    /// Update period of the last accepted manifest, if it is short enough to be honored.
    fn refresh_interval(&self) -> Option<Duration> {
        self.manifest
            .minimum_update_period
            .filter(|period| *period < self.config.refresh_ceiling())
            .and_then(|period| period.to_std().ok())
    }

    fn dispatch_pass(&mut self) {
        let correction = self.statistics.correction();
        let now = self.clock.now() - correction;
        let pass = self.scheduler.plan(&mut self.manifest, now, correction);
        self.pending = pass.pending;

        for fault in pass.faults {
            self.emit(Report::ScheduleFault {
                probe: fault.probe,
                error: fault.error.to_string(),
            });
        }

        for dispatch in pass.dispatches {
            match dispatch.delay {
                None => self.issue(dispatch),
                Some(delay) => {
                    let events = self.events_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = events.send(Event::Due(dispatch));
                    });
                }
            }
        }
    }

    fn issue(&mut self, dispatch: Dispatch) {
        let Dispatch { probe, url, .. } = dispatch;
        let issued_at = self.clock.now();
        match self.manifest.segment_mut(&probe) {
            Some(segment) => segment.check_mut(probe.kind).mark_issued(issued_at),
            None => {
                self.emit(Report::Unmatched {
                    probe,
                    error: MadoError::UnmatchedProbe(probe).to_string(),
                });
                return;
            }
        }
        tracing::debug!(%probe, %url, "Probing segment");

        let prober = self.prober.clone();
        let clock = self.clock.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = prober.probe(&url).await;
            let completion = ProbeCompletion {
                probe,
                completed_at: clock.now(),
                result,
            };
            let _ = events.send(Event::Completed(completion));
        });
    }

    fn handle_event(&mut self, event: Event) {
        let completion = match event {
            Event::Due(dispatch) => return self.issue(dispatch),
            Event::Completed(completion) => completion,
        };

        let probe = completion.probe;
        match correlate(&mut self.manifest, &mut self.statistics, completion) {
            Ok(report) => {
                match &report.outcome {
                    Outcome::Available { status } => {
                        tracing::info!(%probe, status, rtt_ms = report.round_trip_ms, "Segment available")
                    }
                    Outcome::Unavailable { status, reason } => tracing::warn!(
                        %probe,
                        url = %report.url,
                        ?status,
                        ?reason,
                        suspected_clock_skew = report.suspected_clock_skew,
                        "Segment unavailable"
                    ),
                }
                self.emit(Report::Check(report));
            }
            Err(e) => {
                tracing::warn!(%probe, error = %e, "Failed to correlate probe completion");
                self.emit(Report::Unmatched {
                    probe,
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, report: Report) {
        // nobody listening is not an error
        let _ = self.reports.send(report);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
