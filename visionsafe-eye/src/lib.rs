//! visionsafe-eye: detection, annotation and batch video jobs
//!
//! Frames are decoded by a [`VideoBackend`], passed through a [`Detector`]
//! (with person tracking), evaluated by the [`FramePipeline`] against the
//! strike ledger, annotated, and re-encoded. Evidence snapshots and
//! violation records are written as strikes happen.

pub mod annotate;
pub mod detector;
pub mod error;
pub mod evidence;
pub mod jobs;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod tracker;
pub mod video;
pub mod yolo;

pub use annotate::{draw_overlays, overlay_for, Overlay};
pub use detector::{Detector, DetectorFactory, TrackingDetector, TrackingDetectorFactory, UnavailableDetectorFactory};
pub use error::{Result, VisionError};
pub use evidence::{is_plain_file_name, EvidenceCapturer};
pub use jobs::{JobManager, JobStatus, VideoJob};
pub use metrics::Metrics;
pub use orchestrator::{partial_path, BatchOrchestrator, Progress};
pub use pipeline::{FramePipeline, FrameReport};
pub use tracker::{ObjectTracker, TrackIdAllocator};
pub use video::{FrameRead, FrameSink, FrameSource, UnsupportedVideoBackend, VideoBackend, VideoMetadata};

use std::sync::Arc;
use visionsafe_core::VisionSafeConfig;

/// Detector factory for the configured model, wrapped with person tracking.
///
/// New persons are numbered from `first_track_id` upwards. Fails with
/// `DetectorUnavailable` when the model cannot be loaded or the crate was
/// built without `opencv`; callers decide whether that is fatal.
pub fn build_detector_factory(config: &VisionSafeConfig, first_track_id: u64) -> Result<Arc<dyn DetectorFactory>> {
    let inner = load_model(config)?;
    Ok(Arc::new(
        TrackingDetectorFactory::new(
            inner,
            config.association.person_class.clone(),
            config.video.tracker_max_age,
            config.video.tracker_iou_threshold,
        )
        .starting_at(first_track_id),
    ))
}

#[cfg(feature = "opencv")]
fn load_model(config: &VisionSafeConfig) -> Result<Arc<dyn DetectorFactory>> {
    Ok(Arc::new(yolo::YoloDetectorFactory::new(&config.video)?))
}

#[cfg(not(feature = "opencv"))]
fn load_model(_config: &VisionSafeConfig) -> Result<Arc<dyn DetectorFactory>> {
    Err(VisionError::DetectorUnavailable(
        "built without the opencv feature".to_string(),
    ))
}

/// Video backend for this build.
pub fn build_video_backend(config: &VisionSafeConfig) -> Arc<dyn VideoBackend> {
    #[cfg(feature = "opencv")]
    {
        Arc::new(video::OpenCvBackend::new(config.video.fourcc.clone()))
    }
    #[cfg(not(feature = "opencv"))]
    {
        let _ = config;
        Arc::new(UnsupportedVideoBackend)
    }
}
