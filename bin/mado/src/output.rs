use mado::{model::Outcome, Progress, Report};

pub fn print_report(report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    match report {
        Report::Check(check) => {
            let timing = if check.past_due { " past due" } else { "" };
            match &check.outcome {
                Outcome::Available { status } => println!(
                    "[ OK ] {} {status} in {:.0}ms{timing}",
                    check.probe, check.round_trip_ms
                ),
                Outcome::Unavailable { status, reason } => {
                    let cause = match (status, reason) {
                        (Some(status), _) => status.to_string(),
                        (None, Some(reason)) => reason.clone(),
                        (None, None) => "unknown error".to_string(),
                    };
                    let skew = if check.suspected_clock_skew {
                        ", clock skew suspected"
                    } else {
                        ""
                    };
                    println!(
                        "[FAIL] {} {cause}{timing}{skew} <{}>",
                        check.probe, check.url
                    );
                }
            }
        }
        Report::Refresh(refresh) => {
            print!("[MPD ] Fetched at {}", refresh.fetch_time.to_rfc3339());
            if let Some(publish_time) = refresh.publish_time {
                print!(", published at {}", publish_time.to_rfc3339());
            }
            println!(", {} new segments", refresh.new_segments);
        }
        Report::RefreshFailed { fetch_time, error } => {
            println!("[MPD ] Fetch at {} failed: {error}", fetch_time.to_rfc3339())
        }
        Report::IgnoredPeriods { count } => {
            println!("[MPD ] {count} additional periods ignored")
        }
        Report::ScheduleFault { probe, error } => println!("[SKIP] {probe}: {error}"),
        Report::Unmatched { probe, error } => println!("[WARN] {probe}: {error}"),
    }
    Ok(())
}

pub fn print_progress(progress: &Progress, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(progress)?);
    } else {
        print!("{progress}");
    }
    Ok(())
}
