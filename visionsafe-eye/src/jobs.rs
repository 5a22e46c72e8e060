//! Background video jobs

use crate::error::VisionError;
use crate::metrics::Metrics;
use crate::orchestrator::{partial_path, remove_partial, BatchOrchestrator, Progress};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoJob {
    pub job_id: Uuid,
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub status: JobStatus,
    pub frames_processed: u64,
    pub total_frames: u64,
    pub frames_skipped: u64,
    pub violations_logged: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl VideoJob {
    pub fn output_file_name(&self) -> Option<String> {
        self.output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }

    fn apply(&mut self, progress: Progress) {
        self.frames_processed = progress.frames_processed;
        self.total_frames = progress.total_frames;
        self.frames_skipped = progress.frames_skipped;
        self.violations_logged = progress.violations_logged;
    }
}

struct JobEntry {
    state: Arc<RwLock<VideoJob>>,
    cancel: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

const DEFAULT_JOB_HISTORY: usize = 100;

/// Owns every submitted job; each runs on tokio's blocking pool.
///
/// Only the newest `job_history` finished jobs are remembered. Source files
/// are deleted once their job finishes unless `keep_sources` is set.
pub struct JobManager {
    orchestrator: Arc<BatchOrchestrator>,
    metrics: Arc<Metrics>,
    processed_dir: PathBuf,
    output_extension: String,
    job_history: usize,
    keep_sources: bool,
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
}

impl JobManager {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        metrics: Arc<Metrics>,
        processed_dir: impl Into<PathBuf>,
        output_extension: impl Into<String>,
    ) -> std::io::Result<Self> {
        let processed_dir = processed_dir.into();
        std::fs::create_dir_all(&processed_dir)?;
        Ok(Self {
            orchestrator,
            metrics,
            processed_dir,
            output_extension: output_extension.into(),
            job_history: DEFAULT_JOB_HISTORY,
            keep_sources: false,
            jobs: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_job_history(mut self, job_history: usize) -> Self {
        self.job_history = job_history.max(1);
        self
    }

    pub fn keep_sources(mut self, keep: bool) -> Self {
        self.keep_sources = keep;
        self
    }

    pub fn processed_dir(&self) -> &PathBuf {
        &self.processed_dir
    }

    /// Queue a job for `source`. Must be called from inside a tokio runtime.
    pub fn submit(&self, source: PathBuf) -> VideoJob {
        let job_id = Uuid::new_v4();
        let short_id = &job_id.simple().to_string()[..8];
        let output_path = self
            .processed_dir
            .join(format!("processed_{}.{}", short_id, self.output_extension));

        let job = VideoJob {
            job_id,
            source_path: source,
            output_path,
            status: JobStatus::Pending,
            frames_processed: 0,
            total_frames: 0,
            frames_skipped: 0,
            violations_logged: 0,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        };

        let state = Arc::new(RwLock::new(job.clone()));
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut jobs = self.jobs.write();
            jobs.insert(
                job_id,
                JobEntry {
                    state: state.clone(),
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );
            self.prune(&mut jobs);
        }

        let orchestrator = self.orchestrator.clone();
        let metrics = self.metrics.clone();
        let keep_sources = self.keep_sources;
        tokio::task::spawn_blocking(move || {
            run_job(&orchestrator, &metrics, &state, &cancel, keep_sources);
            let _ = done_tx.send(true);
        });

        info!("Job {} queued for {:?}", job_id, job.source_path);
        job
    }

    /// Forget the oldest finished jobs beyond `job_history`. Running jobs are kept.
    fn prune(&self, jobs: &mut HashMap<Uuid, JobEntry>) {
        if jobs.len() <= self.job_history {
            return;
        }
        let mut finished: Vec<(DateTime<Utc>, Uuid)> = jobs
            .iter()
            .filter_map(|(id, entry)| {
                let job = entry.state.read();
                job.status.is_terminal().then_some((job.created_at, *id))
            })
            .collect();
        finished.sort();
        let excess = jobs.len() - self.job_history;
        for (_, id) in finished.into_iter().take(excess) {
            jobs.remove(&id);
            debug!("Job {} dropped from history", id);
        }
    }

    pub fn get(&self, job_id: &Uuid) -> Option<VideoJob> {
        self.jobs.read().get(job_id).map(|entry| entry.state.read().clone())
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<VideoJob> {
        let mut jobs: Vec<VideoJob> = self
            .jobs
            .read()
            .values()
            .map(|entry| entry.state.read().clone())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Request cancellation; the job fails with reason `cancelled` at its next frame.
    pub fn cancel(&self, job_id: &Uuid) -> Option<VideoJob> {
        let jobs = self.jobs.read();
        let entry = jobs.get(job_id)?;
        if !entry.state.read().status.is_terminal() {
            entry.cancel.store(true, Ordering::SeqCst);
            info!("Cancellation requested for job {}", job_id);
        }
        let snapshot = entry.state.read().clone();
        Some(snapshot)
    }

    /// Wait up to `timeout` for the job to reach a terminal state, then return it.
    pub async fn wait(&self, job_id: &Uuid, timeout: Duration) -> Option<VideoJob> {
        let mut done = self.jobs.read().get(job_id)?.done.clone();
        let _ = tokio::time::timeout(timeout, async move {
            let _ = done.wait_for(|finished| *finished).await;
        })
        .await;
        self.get(job_id)
    }
}

fn run_job(
    orchestrator: &BatchOrchestrator,
    metrics: &Metrics,
    state: &RwLock<VideoJob>,
    cancel: &AtomicBool,
    keep_source: bool,
) {
    let (job_id, source, output) = {
        let mut job = state.write();
        job.status = JobStatus::Processing;
        (job.job_id, job.source_path.clone(), job.output_path.clone())
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        orchestrator.run(&source, &output, Utc::now(), cancel, &mut |progress| {
            state.write().apply(progress);
        })
    }))
    .unwrap_or_else(|payload| {
        remove_partial(&partial_path(&output));
        Err(VisionError::Panicked(panic_message(payload.as_ref())))
    });
    if !keep_source {
        remove_source(&source);
    }

    let mut job = state.write();
    job.finished_at = Some(Utc::now());
    match result {
        Ok(progress) => {
            job.apply(progress);
            job.status = JobStatus::Completed;
            metrics.record_job(true);
            info!("Job {} completed ({} frames)", job_id, progress.frames_processed);
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.error = Some(match e {
                VisionError::Cancelled => "cancelled".to_string(),
                other => other.to_string(),
            });
            metrics.record_job(false);
            error!("Job {} failed: {}", job_id, job.error.as_deref().unwrap_or_default());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn remove_source(source: &Path) {
    match std::fs::remove_file(source) {
        Ok(()) => debug!("Removed source {:?}", source),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove source {:?}: {}", source, e),
    }
}
