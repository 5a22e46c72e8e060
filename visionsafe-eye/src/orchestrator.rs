//! Batch video orchestration: decode, run the pipeline, annotate, re-encode.

use crate::annotate::{draw_overlays, Overlay};
use crate::detector::DetectorFactory;
use crate::error::{Result, VisionError};
use crate::metrics::Metrics;
use crate::pipeline::FramePipeline;
use crate::video::{FrameRead, VideoBackend, VideoMetadata};
use chrono::{DateTime, Duration, Utc};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress snapshot handed to the caller after every frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub frames_processed: u64,
    pub total_frames: u64,
    pub frames_skipped: u64,
    pub violations_logged: u64,
}

pub struct BatchOrchestrator {
    backend: Arc<dyn VideoBackend>,
    detectors: Arc<dyn DetectorFactory>,
    pipeline: Arc<FramePipeline>,
    metrics: Arc<Metrics>,
    detection_stride: u64,
}

impl BatchOrchestrator {
    pub fn new(
        backend: Arc<dyn VideoBackend>,
        detectors: Arc<dyn DetectorFactory>,
        pipeline: Arc<FramePipeline>,
        metrics: Arc<Metrics>,
        detection_stride: u32,
    ) -> Self {
        Self {
            backend,
            detectors,
            pipeline,
            metrics,
            detection_stride: detection_stride.max(1) as u64,
        }
    }

    /// Process `source` into `output`.
    ///
    /// Frames are encoded to [`partial_path`] and renamed to `output` only once
    /// the encoder has finished, so `output` never holds a truncated video. On
    /// any error the partial file is removed.
    ///
    /// `started_at` anchors the media clock: frame `i` is stamped
    /// `started_at + i / fps`.
    pub fn run(
        &self,
        source: &Path,
        output: &Path,
        started_at: DateTime<Utc>,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<Progress> {
        let partial = partial_path(output);
        let result = self.run_inner(source, &partial, output, started_at, cancel, on_progress);
        if result.is_err() {
            remove_partial(&partial);
        }
        result
    }

    fn run_inner(
        &self,
        source_path: &Path,
        partial_path: &Path,
        output_path: &Path,
        started_at: DateTime<Utc>,
        cancel: &AtomicBool,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<Progress> {
        let mut detector = self.detectors.create()?;
        let mut source = self.backend.open_source(source_path)?;
        let metadata = source.metadata();
        let mut sink = self.backend.create_sink(partial_path, &metadata)?;

        info!(
            "Processing {:?} -> {:?} ({} frames, detector {})",
            source_path,
            output_path,
            metadata.total_frames,
            self.detectors.name()
        );

        let fps = metadata.effective_fps();
        let mut progress = Progress {
            total_frames: metadata.total_frames,
            ..Progress::default()
        };
        let mut last_frame: Option<RgbImage> = None;
        let mut last_overlays: Vec<Overlay> = Vec::new();
        let mut index: u64 = 0;

        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(VisionError::Cancelled);
            }

            let skipped = match source.next_frame()? {
                FrameRead::End => break,
                FrameRead::Corrupt(reason) => {
                    warn!("Frame {} skipped: {}", index, reason);
                    sink.write_frame(&filler(&last_frame, &metadata), &last_overlays)?;
                    true
                }
                FrameRead::Frame(frame) => {
                    let now = started_at + Duration::microseconds((index as f64 / fps * 1_000_000.0) as i64);
                    // between detector runs the last overlays are repeated
                    let usable = if index % self.detection_stride == 0 {
                        match detector.detect(&frame) {
                            Ok(detections) => {
                                let report = self.pipeline.process(&frame, &detections, now)?;
                                progress.violations_logged += report.records.len() as u64;
                                last_overlays = report.overlays;
                                true
                            }
                            Err(e) => {
                                warn!("Frame {} skipped, detector failed: {}", index, e);
                                false
                            }
                        }
                    } else {
                        true
                    };

                    if usable {
                        let annotated = annotate(frame, &last_overlays);
                        sink.write_frame(&annotated, &last_overlays)?;
                        last_frame = Some(annotated);
                    } else {
                        sink.write_frame(&filler(&last_frame, &metadata), &last_overlays)?;
                    }
                    !usable
                }
            };

            index += 1;
            progress.frames_processed += 1;
            if skipped {
                progress.frames_skipped += 1;
            }
            self.metrics.record_frame(skipped);
            debug!("Frame {} done", index);
            on_progress(progress);
        }

        sink.finish()?;
        drop(sink);
        std::fs::rename(partial_path, output_path)?;
        info!(
            "Finished {:?}: {} frames ({} skipped), {} records",
            output_path, progress.frames_processed, progress.frames_skipped, progress.violations_logged
        );
        Ok(progress)
    }
}

/// Hidden sibling of `output` that frames are encoded into. The extension is
/// kept because encoders pick the container from it.
pub fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".{}", name))
}

/// Best-effort removal of a partial output.
pub(crate) fn remove_partial(partial: &Path) {
    if partial.exists() {
        if let Err(e) = std::fs::remove_file(partial) {
            warn!("Could not remove partial output {:?}: {}", partial, e);
        }
    }
}

/// Stand-in for an unusable frame: the previous annotated frame, or black.
fn filler(last_frame: &Option<RgbImage>, metadata: &VideoMetadata) -> RgbImage {
    last_frame
        .clone()
        .unwrap_or_else(|| RgbImage::new(metadata.width.max(1), metadata.height.max(1)))
}

fn annotate(mut frame: RgbImage, overlays: &[Overlay]) -> RgbImage {
    draw_overlays(&mut frame, overlays);
    frame
}
