//! Decides when the start and end check of every retained segment is probed.
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use url::Url;

use crate::{
    config::ValidatorConfig,
    model::{CheckKind, LiveManifest, ProbeRef, RepresentationCounters, SegmentCheck},
    MadoError,
};

/// A probe the scheduler committed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub probe: ProbeRef,
    pub url: Url,
    /// `None` issues the probe right away, otherwise after a one-shot timer.
    pub delay: Option<Duration>,
}

#[derive(Debug)]
pub struct ScheduleFault {
    pub probe: ProbeRef,
    pub error: MadoError,
}

#[derive(Debug, Default)]
pub struct SchedulePass {
    pub dispatches: Vec<Dispatch>,
    pub faults: Vec<ScheduleFault>,
    /// Checks still waiting for their time to come.
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    near_term: TimeDelta,
    end_check_lead: TimeDelta,
    past_due_budget: usize,
    past_due_issued: usize,
}

impl Scheduler {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            near_term: config.near_term_threshold(),
            end_check_lead: config.end_check_lead(),
            past_due_budget: config.past_due_budget,
            past_due_issued: 0,
        }
    }

    /// Walks every retained segment and commits the checks that are due or about to be.
    ///
    /// `now` is the corrected local time, `correction` the offset it was corrected by.
    pub fn plan(
        &mut self,
        manifest: &mut LiveManifest,
        now: DateTime<Utc>,
        correction: TimeDelta,
    ) -> SchedulePass {
        let mut pass = SchedulePass::default();

        for (period_index, period) in manifest.periods.iter_mut().enumerate() {
            for (set_index, set) in period.adaptation_sets.iter_mut().enumerate() {
                for (index, representation) in set.representations.iter_mut().enumerate() {
                    let floor = representation.first_retained_segment;
                    let counters = &mut representation.counters;
                    for (number, segment) in representation.segments.range_mut(floor..) {
                        let site = ProbeSite {
                            period: period_index,
                            adaptation_set: set_index,
                            representation: index,
                            segment: *number,
                        };
                        self.plan_segment(segment, counters, site, now, correction, &mut pass);
                    }
                }
            }
        }

        pass
    }

    fn plan_segment(
        &mut self,
        segment: &mut SegmentCheck,
        counters: &mut RepresentationCounters,
        site: ProbeSite,
        now: DateTime<Utc>,
        correction: TimeDelta,
        pass: &mut SchedulePass,
    ) {
        let delta_end = segment.end.availability_time - self.end_check_lead - now;
        if delta_end < TimeDelta::zero() {
            // the window has lapsed, neither side is probed anymore
            return;
        }

        if !segment.start.dispatched {
            let delta_start = segment.start.availability_time - now;
            if delta_start <= TimeDelta::zero() {
                if self.past_due_issued < self.past_due_budget {
                    let probe = site.probe(CheckKind::Start);
                    if self.commit(segment, counters, probe, None, correction, pass) {
                        self.past_due_issued += 1;
                    }
                } else {
                    pass.pending += 1;
                }
            } else if delta_start < self.near_term {
                let probe = site.probe(CheckKind::Start);
                self.commit(segment, counters, probe, Some(delta_start), correction, pass);
            } else {
                pass.pending += 1;
            }
        }

        if !segment.end.dispatched {
            let probe = site.probe(CheckKind::End);
            if delta_end == TimeDelta::zero() {
                self.commit(segment, counters, probe, None, correction, pass);
            } else if delta_end < self.near_term {
                self.commit(segment, counters, probe, Some(delta_end), correction, pass);
            } else {
                pass.pending += 1;
            }
        }
    }

    /// Returns whether a probe was committed.
    ///
    /// A check that can not be scheduled is still marked dispatched, so its fault is
    /// reported once and never retried.
    fn commit(
        &self,
        segment: &mut SegmentCheck,
        counters: &mut RepresentationCounters,
        probe: ProbeRef,
        delay: Option<TimeDelta>,
        correction: TimeDelta,
        pass: &mut SchedulePass,
    ) -> bool {
        let prepared = segment.url().and_then(|url| {
            let delay = delay.map(|delay| delay.to_std()).transpose()?;
            Ok((url, delay))
        });

        let (url, delay) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                segment
                    .check_mut(probe.kind)
                    .mark_dispatched(correction, delay.is_none());
                tracing::warn!(%probe, location = %segment.location, %error, "Failed to schedule availability check");
                pass.faults.push(ScheduleFault { probe, error });
                return false;
            }
        };
        if !segment
            .check_mut(probe.kind)
            .mark_dispatched(correction, delay.is_none())
        {
            return false;
        }
        counters.get_mut(probe.kind).dispatched += 1;

        tracing::debug!(%probe, %url, ?delay, "Scheduled availability check");
        pass.dispatches.push(Dispatch { probe, url, delay });
        true
    }
}

#[derive(Debug, Clone, Copy)]
struct ProbeSite {
    period: usize,
    adaptation_set: usize,
    representation: usize,
    segment: u64,
}

impl ProbeSite {
    fn probe(&self, kind: CheckKind) -> ProbeRef {
        ProbeRef {
            period: self.period,
            adaptation_set: self.adaptation_set,
            representation: self.representation,
            segment: self.segment,
            kind,
        }
    }
}
