use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters, mirrored into the `metrics` facade
#[derive(Debug, Default)]
pub struct Metrics {
    pub strikes_total: AtomicU64,
    pub records_total: AtomicU64,
    pub frames_processed_total: AtomicU64,
    pub frames_skipped_total: AtomicU64,
    pub evidence_failures_total: AtomicU64,
    pub jobs_completed_total: AtomicU64,
    pub jobs_failed_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_strike(&self) {
        self.strikes_total.fetch_add(1, Ordering::Relaxed);
        counter!("visionsafe_strikes_total").increment(1);
    }

    pub fn record_violation_record(&self) {
        self.records_total.fetch_add(1, Ordering::Relaxed);
        counter!("visionsafe_records_total").increment(1);
    }

    pub fn record_frame(&self, skipped: bool) {
        self.frames_processed_total.fetch_add(1, Ordering::Relaxed);
        counter!("visionsafe_frames_processed_total").increment(1);
        if skipped {
            self.frames_skipped_total.fetch_add(1, Ordering::Relaxed);
            counter!("visionsafe_frames_skipped_total").increment(1);
        }
    }

    pub fn record_evidence_failure(&self) {
        self.evidence_failures_total.fetch_add(1, Ordering::Relaxed);
        counter!("visionsafe_evidence_failures_total").increment(1);
    }

    pub fn record_job(&self, completed: bool) {
        let status = if completed {
            self.jobs_completed_total.fetch_add(1, Ordering::Relaxed);
            "completed"
        } else {
            self.jobs_failed_total.fetch_add(1, Ordering::Relaxed);
            "failed"
        };
        counter!("visionsafe_jobs_total", "status" => status).increment(1);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
