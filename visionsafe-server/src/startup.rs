// Service assembly: store, ledger, evidence, pipeline and job manager

use crate::http::ApiState;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use visionsafe_core::{ConfigError, PpeAssociator, StrikeLedger, VisionSafeConfig};
use visionsafe_eye::{
    build_detector_factory, build_video_backend, BatchOrchestrator, DetectorFactory, EvidenceCapturer,
    FramePipeline, JobManager, Metrics, UnavailableDetectorFactory, VideoBackend, VisionError,
};
use visionsafe_storage::{open_store, PersistenceWriter, StorageError, ViolationStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Vision error: {0}")]
    Vision(#[from] VisionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire the services around the given store, video backend and detectors.
pub fn build_state(
    config: VisionSafeConfig,
    store: Arc<dyn ViolationStore>,
    backend: Arc<dyn VideoBackend>,
    detectors: Arc<dyn DetectorFactory>,
) -> Result<ApiState, StartupError> {
    config.validate()?;
    std::fs::create_dir_all(&config.video.upload_dir)?;

    let metrics = Arc::new(Metrics::new());
    let ledger = Arc::new(StrikeLedger::new(config.ledger.clone()));
    let evidence = Arc::new(EvidenceCapturer::new(config.evidence.clone())?);
    let writer = PersistenceWriter::new(
        store.clone(),
        config.storage.write_attempts,
        Duration::from_millis(config.storage.retry_backoff_ms),
    );
    let pipeline = Arc::new(FramePipeline::new(
        PpeAssociator::new(config.association.clone()),
        ledger.clone(),
        evidence.clone(),
        writer,
        metrics.clone(),
    ));
    let orchestrator = Arc::new(BatchOrchestrator::new(
        backend,
        detectors,
        pipeline,
        metrics.clone(),
        config.video.detection_stride,
    ));
    let jobs = Arc::new(JobManager::new(
        orchestrator,
        metrics.clone(),
        config.video.processed_dir.clone(),
        config.video.output_extension.clone(),
    )?
    .with_job_history(config.video.job_history)
    .keep_sources(config.video.keep_uploads));

    Ok(ApiState {
        store,
        ledger,
        evidence,
        jobs,
        metrics,
        config: Arc::new(config),
    })
}

/// Build the production state: configured store, native video backend and YOLO detector.
///
/// A missing detector is fatal when `video.require_detector` is set; otherwise
/// the server starts and every upload fails with the reason.
pub fn build_default_state(config: VisionSafeConfig) -> Result<ApiState, StartupError> {
    config.validate()?;
    let store = open_store(&config.storage)?;
    info!("Violation store ready ({} records)", store.len()?);
    let first_track_id = next_free_track_id(&*store)?;

    let detectors: Arc<dyn DetectorFactory> = match build_detector_factory(&config, first_track_id) {
        Ok(factory) => {
            info!("Detector ready: {}", factory.name());
            factory
        }
        Err(e) if config.video.require_detector => return Err(e.into()),
        Err(e) => {
            warn!("Starting without a detector: {}", e);
            Arc::new(UnavailableDetectorFactory::new(e.to_string()))
        }
    };
    let backend = build_video_backend(&config);

    build_state(config, store, backend, detectors)
}

/// First worker id not yet used by any stored record, so people seen after a
/// restart are never merged with earlier ones.
pub fn next_free_track_id(store: &dyn ViolationStore) -> Result<u64, StorageError> {
    Ok(store
        .all()?
        .iter()
        .map(|record| record.worker_id.0)
        .max()
        .map_or(1, |id| id.saturating_add(1)))
}
