//! Detector adapter seams

use crate::error::{Result, VisionError};
use crate::tracker::{assign_ids, ObjectTracker, TrackIdAllocator};
use image::RgbImage;
use std::sync::Arc;
use visionsafe_core::Detection;

/// Produces detections for one frame. One instance serves one stream.
pub trait Detector: Send {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Builds a fresh detector for each stream.
pub trait DetectorFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Detector>>;

    fn name(&self) -> &str;
}

/// Wraps a raw detector and gives persons stable track ids
pub struct TrackingDetector {
    inner: Box<dyn Detector>,
    tracker: ObjectTracker,
    person_class: String,
}

impl TrackingDetector {
    pub fn new(inner: Box<dyn Detector>, person_class: impl Into<String>, tracker: ObjectTracker) -> Self {
        Self {
            inner,
            tracker,
            person_class: person_class.into(),
        }
    }
}

impl Detector for TrackingDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let mut detections = self.inner.detect(frame)?;
        // ids from the raw detector are discarded
        for detection in detections.iter_mut() {
            detection.track_id = None;
        }
        assign_ids(&self.tracker, &mut detections, &self.person_class);
        Ok(detections)
    }
}

/// Factory producing a `TrackingDetector` around every detector of `inner`.
///
/// All trackers it builds share one id allocator, so a person in one video
/// never inherits the ledger entry of a person from another.
pub struct TrackingDetectorFactory {
    inner: Arc<dyn DetectorFactory>,
    person_class: String,
    max_age: u32,
    iou_threshold: f32,
    ids: TrackIdAllocator,
}

impl TrackingDetectorFactory {
    pub fn new(inner: Arc<dyn DetectorFactory>, person_class: impl Into<String>, max_age: u32, iou_threshold: f32) -> Self {
        Self {
            inner,
            person_class: person_class.into(),
            max_age,
            iou_threshold,
            ids: TrackIdAllocator::default(),
        }
    }

    /// Start numbering at `first_id`, e.g. past ids already in the store.
    pub fn starting_at(mut self, first_id: u64) -> Self {
        self.ids = TrackIdAllocator::starting_at(first_id);
        self
    }
}

impl DetectorFactory for TrackingDetectorFactory {
    fn create(&self) -> Result<Box<dyn Detector>> {
        let inner = self.inner.create()?;
        Ok(Box::new(TrackingDetector::new(
            inner,
            self.person_class.clone(),
            ObjectTracker::with_ids(self.max_age, self.iou_threshold, self.ids.clone()),
        )))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Stand-in when no detector backend could be built; every job fails with the reason.
pub struct UnavailableDetectorFactory {
    reason: String,
}

impl UnavailableDetectorFactory {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl DetectorFactory for UnavailableDetectorFactory {
    fn create(&self) -> Result<Box<dyn Detector>> {
        Err(VisionError::DetectorUnavailable(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
