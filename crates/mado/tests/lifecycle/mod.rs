use std::{collections::VecDeque, sync::Mutex, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use mado::{
    correlator::CheckReport,
    manifest::{
        template::TemplateUrl, AdaptationSetSnapshot, Addressing, ManifestSnapshot,
        PeriodSnapshot, RepresentationSnapshot,
    },
    model::CheckKind,
    timing::{SampleTimeline, TimelineEntry},
    CancellationToken, MadoError, MadoResult, ManifestSource, ProbeResponse, Prober, Report,
    RuntimeClock, Validator, ValidatorConfig,
};
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;

use crate::AssertWrapper;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn snapshot(
    availability_start_time: DateTime<Utc>,
    minimum_update_period: Option<TimeDelta>,
    time_shift_buffer_depth: TimeDelta,
    addressing: Addressing,
) -> ManifestSnapshot {
    ManifestSnapshot {
        availability_start_time,
        publish_time: Some(availability_start_time),
        minimum_update_period,
        time_shift_buffer_depth: Some(time_shift_buffer_depth),
        suggested_presentation_delay: None,
        min_buffer_time: None,
        period: PeriodSnapshot {
            id: Some("0".to_string()),
            start: TimeDelta::zero(),
            adaptation_sets: vec![AdaptationSetSnapshot {
                content_type: Some("video".to_string()),
                representations: vec![RepresentationSnapshot {
                    id: Some("v1".to_string()),
                    bandwidth: Some(1_000_000),
                    media: TemplateUrl("https://cdn.example.com/v1/$Number$.m4s".to_string()),
                    start_number: 1,
                    addressing,
                }],
            }],
        },
        ignored_periods: 0,
    }
}

/// 2s segments announced by `@duration`.
fn numbered(
    availability_start_time: DateTime<Utc>,
    minimum_update_period: Option<TimeDelta>,
    time_shift_buffer_depth: TimeDelta,
) -> ManifestSnapshot {
    snapshot(
        availability_start_time,
        minimum_update_period,
        time_shift_buffer_depth,
        Addressing::Number {
            duration: 2.0,
            timescale: 1,
        },
    )
}

/// `count` segments of 2s listed in a SegmentTimeline starting at `t0`.
fn timeline(count: i64) -> ManifestSnapshot {
    snapshot(
        t0(),
        Some(TimeDelta::seconds(2)),
        TimeDelta::seconds(30),
        Addressing::Timeline {
            sample_timeline: SampleTimeline {
                timescale: 1000,
                presentation_time_offset: 0,
            },
            entries: vec![TimelineEntry {
                time: Some(0),
                duration: 2000,
                repeat_count: Some(count - 1),
            }],
        },
    )
}

/// Replays scripted fetch results, then keeps serving `fallback`.
struct ScriptedSource {
    script: Mutex<VecDeque<MadoResult<ManifestSnapshot>>>,
    fallback: ManifestSnapshot,
}

impl ScriptedSource {
    fn new(script: Vec<MadoResult<ManifestSnapshot>>, fallback: ManifestSnapshot) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
        }
    }
}

impl ManifestSource for ScriptedSource {
    async fn fetch(&self) -> MadoResult<ManifestSnapshot> {
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

struct FnProber<F>(F);

impl<F> Prober for FnProber<F>
where
    F: Fn(&Url) -> MadoResult<ProbeResponse> + Send + Sync,
{
    async fn probe(&self, url: &Url) -> MadoResult<ProbeResponse> {
        (self.0)(url)
    }
}

fn ok(_: &Url) -> MadoResult<ProbeResponse> {
    Ok(ProbeResponse {
        status: 200,
        server_time: None,
    })
}

/// A manifest without an update period covers 20s past its fetch time.
fn config() -> ValidatorConfig {
    ValidatorConfig {
        refresh_ceiling_secs: 20,
        ..Default::default()
    }
}

fn drain(reports: &mut UnboundedReceiver<Report>) -> Vec<Report> {
    let mut drained = Vec::new();
    while let Ok(report) = reports.try_recv() {
        drained.push(report);
    }
    drained
}

fn checks(reports: &[Report]) -> Vec<&CheckReport> {
    reports
        .iter()
        .filter_map(|report| match report {
            Report::Check(check) => Some(check),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_static_manifest_completes() {
    let source = ScriptedSource::new(vec![], numbered(t0(), None, TimeDelta::seconds(6)));
    let (validator, mut reports) = Validator::new(source, FnProber(ok), config());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));

    let progress = validator
        .run(CancellationToken::new())
        .await
        .assert_success();

    // segments 1..=11, every window is probed at both ends
    assert_eq!(progress.start.dispatched, 11);
    assert_eq!(progress.end.dispatched, 11);
    assert_eq!(progress.start.successful, 11);
    assert_eq!(progress.end.successful, 11);
    assert_eq!(progress.correction_ms, 0.0);

    let reports = drain(&mut reports);
    let checks = checks(&reports);
    assert_eq!(checks.len(), 22);
    assert!(checks.iter().all(|check| !check.past_due));
    assert!(checks.iter().all(|check| check.outcome.is_success()));
}

#[tokio::test(start_paused = true)]
async fn test_extra_periods_are_reported() {
    let mut manifest = numbered(t0(), None, TimeDelta::seconds(6));
    manifest.ignored_periods = 2;
    let source = ScriptedSource::new(vec![], manifest);
    let (validator, mut reports) = Validator::new(source, FnProber(ok), config());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));

    let progress = validator
        .run(CancellationToken::new())
        .await
        .assert_success();
    assert_eq!(progress.start.successful, 11);

    let reports = drain(&mut reports);
    assert!(reports
        .iter()
        .any(|report| matches!(report, Report::IgnoredPeriods { count: 2 })));
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_segments_are_reported() {
    let mut manifest = numbered(t0(), None, TimeDelta::seconds(6));
    manifest.period.adaptation_sets[0].representations[0].media =
        TemplateUrl("https://cdn example.com/v1/$Number$.m4s".to_string());
    let source = ScriptedSource::new(vec![], manifest);
    let (validator, mut reports) = Validator::new(source, FnProber(ok), config());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));

    let progress = validator
        .run(CancellationToken::new())
        .await
        .assert_success();
    assert_eq!(progress.start.dispatched, 0);
    assert_eq!(progress.end.dispatched, 0);

    let reports = drain(&mut reports);
    assert!(checks(&reports).is_empty());
    let faults = reports
        .iter()
        .filter(|report| matches!(report, Report::ScheduleFault { .. }))
        .count();
    assert_eq!(faults, 22);
}

#[tokio::test(start_paused = true)]
async fn test_timeline_refresh_appends_segments() {
    let source = ScriptedSource::new(vec![Ok(timeline(3))], timeline(6));
    let (validator, mut reports) = Validator::new(source, FnProber(ok), config());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
    });
    let progress = validator.run(token).await.assert_success();

    let reports = drain(&mut reports);
    let new_segments: Vec<_> = reports
        .iter()
        .filter_map(|report| match report {
            Report::Refresh(refresh) => Some(refresh.new_segments),
            _ => None,
        })
        .collect();
    assert!(new_segments.len() >= 2);
    assert_eq!(new_segments[0], 3);
    assert_eq!(new_segments[1], 3);
    assert!(new_segments[2..].iter().all(|count| *count == 0));
    assert_eq!(progress.refreshes[0].new_segments, 3);

    // the first segment was already available and its check kept its state
    let first = checks(&reports)
        .into_iter()
        .find(|check| check.probe.segment == 1 && check.probe.kind == CheckKind::Start)
        .assert_success();
    assert!(first.past_due);
}

#[tokio::test(start_paused = true)]
async fn test_clock_skew_correction() {
    let clock = RuntimeClock::starting_at(t0() + TimeDelta::seconds(1));
    let server = clock.clone();
    let prober = FnProber(move |_: &Url| {
        // the origin runs 1.1s behind the local clock
        Ok(ProbeResponse {
            status: 200,
            server_time: Some(mado::Clock::now(&server) - TimeDelta::milliseconds(1100)),
        })
    });

    let source = ScriptedSource::new(vec![], numbered(t0(), None, TimeDelta::seconds(6)));
    let (validator, _reports) = Validator::new(source, prober, config());
    let progress = validator
        .with_clock(clock)
        .run(CancellationToken::new())
        .await
        .assert_success();

    assert_eq!(progress.mean_clock_skew_ms, Some(1100.0));
    assert_eq!(progress.correction_ms, 600.0);
    assert_eq!(progress.start.successful, 11);
    assert_eq!(progress.end.successful, 11);
}

#[tokio::test(start_paused = true)]
async fn test_failures_raise_skew_suspicion() {
    let prober = FnProber(|_: &Url| {
        Ok(ProbeResponse {
            status: 404,
            server_time: Some(t0() - TimeDelta::seconds(60)),
        })
    });
    let config = ValidatorConfig {
        clock_skew_correction: false,
        ..config()
    };

    let source = ScriptedSource::new(vec![], numbered(t0(), None, TimeDelta::seconds(6)));
    let (validator, mut reports) = Validator::new(source, prober, config);
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));
    let progress = validator
        .run(CancellationToken::new())
        .await
        .assert_success();

    assert_eq!(progress.start.processed, 11);
    assert_eq!(progress.start.successful, 0);
    assert_eq!(progress.end.successful, 0);
    assert_eq!(progress.correction_ms, 0.0);

    let reports = drain(&mut reports);
    let checks = checks(&reports);
    assert_eq!(checks.len(), 22);
    assert!(checks.iter().all(|check| check.suspected_clock_skew));
}

#[tokio::test(start_paused = true)]
async fn test_late_join_issues_one_past_due_check() {
    // joined 1000s into the stream, segments stay available for 60s
    let source = ScriptedSource::new(
        vec![],
        numbered(t0() - TimeDelta::seconds(1000), None, TimeDelta::seconds(60)),
    );
    let (validator, mut reports) = Validator::new(source, FnProber(ok), config());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0()));
    let progress = validator
        .run(CancellationToken::new())
        .await
        .assert_success();

    // one past-due start (470), then 501..=510 as they become available
    assert_eq!(progress.start.dispatched, 11);
    // every window still open at the first fetch, 470..=510
    assert_eq!(progress.end.dispatched, 41);

    let reports = drain(&mut reports);
    let past_due_starts: Vec<_> = checks(&reports)
        .into_iter()
        .filter(|check| check.probe.kind == CheckKind::Start && check.past_due)
        .collect();
    assert_eq!(past_due_starts.len(), 1);
    assert_eq!(past_due_starts[0].probe.segment, 470);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_is_retried() {
    let source = ScriptedSource::new(
        vec![Err(MadoError::NoPeriodFound)],
        numbered(t0(), None, TimeDelta::seconds(6)),
    );
    let (validator, mut reports) = Validator::new(source, FnProber(ok), config());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));
    let progress = validator
        .run(CancellationToken::new())
        .await
        .assert_success();

    let reports = drain(&mut reports);
    assert!(matches!(reports[0], Report::RefreshFailed { .. }));
    assert!(matches!(reports[1], Report::Refresh(_)));
    assert_eq!(progress.refreshes.len(), 1);
    // fetched after the 2s fallback delay
    assert_eq!(
        progress.refreshes[0].fetch_time,
        t0() + TimeDelta::seconds(3)
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_refreshing() {
    let source = ScriptedSource::new(
        vec![],
        numbered(t0(), Some(TimeDelta::seconds(2)), TimeDelta::seconds(30)),
    );
    let (validator, _reports) = Validator::new(source, FnProber(ok), ValidatorConfig::default());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));

    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(11)).await;
        cancel.cancel();
    });
    let progress = validator.run(token).await.assert_success();

    // refreshed at 0, 2, 4, 6, 8 and 10s, only the last five are kept
    assert_eq!(progress.refreshes.len(), 5);
    assert_eq!(
        progress.refreshes[4].fetch_time,
        t0() + TimeDelta::seconds(11)
    );
}

#[tokio::test(start_paused = true)]
async fn test_period_change_is_fatal() {
    let mut changed = numbered(t0(), Some(TimeDelta::seconds(2)), TimeDelta::seconds(30));
    changed.period.id = Some("1".to_string());
    let source = ScriptedSource::new(
        vec![Ok(numbered(
            t0(),
            Some(TimeDelta::seconds(2)),
            TimeDelta::seconds(30),
        ))],
        changed,
    );
    let (validator, mut reports) = Validator::new(source, FnProber(ok), ValidatorConfig::default());
    let validator = validator.with_clock(RuntimeClock::starting_at(t0() + TimeDelta::seconds(1)));

    let error = validator.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(error, MadoError::PeriodIdChanged { .. }));
    assert!(error.is_fatal());

    let reports = drain(&mut reports);
    assert!(matches!(reports.last(), Some(Report::RefreshFailed { .. })));
}
