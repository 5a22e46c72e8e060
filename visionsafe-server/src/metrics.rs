use std::fmt::Write;
use visionsafe_eye::Metrics;

/// Render pipeline counters and ledger/store gauges in Prometheus text format.
///
/// `stored_records` is `None` when the store could not be read; the gauge is then omitted.
pub fn render(metrics: &Metrics, tracked_workers: usize, stored_records: Option<usize>) -> String {
    let counters = [
        ("visionsafe_strikes_total", "Strikes applied", &metrics.strikes_total),
        ("visionsafe_records_total", "Violation records persisted", &metrics.records_total),
        ("visionsafe_frames_processed_total", "Video frames processed", &metrics.frames_processed_total),
        ("visionsafe_frames_skipped_total", "Video frames that failed to decode", &metrics.frames_skipped_total),
        ("visionsafe_evidence_failures_total", "Evidence snapshots that could not be written", &metrics.evidence_failures_total),
    ];

    let mut out = String::new();
    for (name, help, value) in counters {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} counter", name);
        let _ = writeln!(out, "{} {}", name, Metrics::get(value));
    }

    let _ = writeln!(out, "# HELP visionsafe_jobs_total Video jobs finished, by outcome");
    let _ = writeln!(out, "# TYPE visionsafe_jobs_total counter");
    let _ = writeln!(
        out,
        "visionsafe_jobs_total{{status=\"completed\"}} {}",
        Metrics::get(&metrics.jobs_completed_total)
    );
    let _ = writeln!(
        out,
        "visionsafe_jobs_total{{status=\"failed\"}} {}",
        Metrics::get(&metrics.jobs_failed_total)
    );

    let _ = writeln!(out, "# HELP visionsafe_tracked_workers Workers known to the strike ledger");
    let _ = writeln!(out, "# TYPE visionsafe_tracked_workers gauge");
    let _ = writeln!(out, "visionsafe_tracked_workers {}", tracked_workers);

    if let Some(records) = stored_records {
        let _ = writeln!(out, "# HELP visionsafe_stored_records Violation records in the store");
        let _ = writeln!(out, "# TYPE visionsafe_stored_records gauge");
        let _ = writeln!(out, "visionsafe_stored_records {}", records);
    }
    out
}
