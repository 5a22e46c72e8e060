//! YOLO ONNX detector
//!
//! Output decoding and NMS are plain Rust; inference runs through OpenCV's DNN
//! module when the `opencv` feature is enabled.

use std::cmp::Ordering;
use visionsafe_core::{BoundingBox, Detection};

/// Geometry needed to map model-space boxes back onto the frame
#[derive(Debug, Clone, Copy)]
pub struct InputScale {
    pub x_factor: f32,
    pub y_factor: f32,
}

/// Decode a YOLOv8-style output tensor laid out as `[4 + classes, candidates]`
/// (box centre/size rows first, then one score row per class).
pub fn decode_output(
    data: &[f32],
    class_names: &[String],
    num_candidates: usize,
    confidence_threshold: f32,
    scale: InputScale,
) -> Vec<Detection> {
    let num_classes = class_names.len();
    if num_candidates == 0 || data.len() < (4 + num_classes) * num_candidates {
        return Vec::new();
    }
    let at = |row: usize, col: usize| data[row * num_candidates + col];

    let mut detections = Vec::new();
    for i in 0..num_candidates {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for class_idx in 0..num_classes {
            let score = at(4 + class_idx, i);
            if score > best_score {
                best_score = score;
                best_class = class_idx;
            }
        }
        if !best_score.is_finite() || best_score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) || w <= 0.0 || h <= 0.0 {
            continue;
        }
        let bbox = BoundingBox::new(
            (cx - w / 2.0) * scale.x_factor,
            (cy - h / 2.0) * scale.y_factor,
            w * scale.x_factor,
            h * scale.y_factor,
        );
        detections.push(Detection::new(None, class_names[best_class].clone(), bbox, best_score.min(1.0)));
    }
    detections
}

/// Per-class non-maximum suppression, highest confidence first.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.retain(|d| d.confidence.is_finite() && d.bbox.is_valid());
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let mut suppressed = vec![false; detections.len()];
    let mut keep = Vec::new();
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if !suppressed[j]
                && detections[i].class == detections[j].class
                && detections[i].bbox.iou(&detections[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
        keep.push(detections[i].clone());
    }
    keep
}

#[cfg(feature = "opencv")]
pub use self::dnn::{YoloDetector, YoloDetectorFactory};

#[cfg(feature = "opencv")]
mod dnn {
    use super::*;
    use crate::detector::{Detector, DetectorFactory};
    use crate::error::{Result, VisionError};
    use crate::video::opencv_backend::rgb_to_mat;
    use image::RgbImage;
    use opencv::{
        core::{Scalar, Size, CV_32F},
        dnn,
        prelude::*,
    };
    use std::path::PathBuf;
    use tracing::{debug, info};
    use visionsafe_core::VideoConfig;

    pub struct YoloDetector {
        net: dnn::Net,
        class_names: Vec<String>,
        confidence: f32,
        nms_threshold: f32,
        input_size: i32,
    }

    // One net per stream, never shared between threads
    unsafe impl Send for YoloDetector {}

    impl Detector for YoloDetector {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
            let bgr = rgb_to_mat(frame)?;
            let blob = dnn::blob_from_image(
                &bgr,
                1.0 / 255.0,
                Size::new(self.input_size, self.input_size),
                Scalar::default(),
                true,
                false,
                CV_32F,
            )?;
            self.net.set_input(&blob, "", 1.0, Scalar::default())?;
            let output = self.net.forward_single("")?;

            let sizes = output.mat_size();
            if sizes.len() != 3 {
                return Err(VisionError::Detection(format!("unexpected output rank {}", sizes.len())));
            }
            let num_candidates = sizes[2] as usize;
            let data = output.data_typed::<f32>()?;

            let scale = InputScale {
                x_factor: frame.width() as f32 / self.input_size as f32,
                y_factor: frame.height() as f32 / self.input_size as f32,
            };
            let raw = decode_output(data, &self.class_names, num_candidates, self.confidence, scale);
            let detections = non_max_suppression(raw, self.nms_threshold);
            debug!("YOLO detected {} objects", detections.len());
            Ok(detections)
        }
    }

    pub struct YoloDetectorFactory {
        model_path: PathBuf,
        class_names: Vec<String>,
        confidence: f32,
        nms_threshold: f32,
        input_size: i32,
    }

    impl YoloDetectorFactory {
        /// Checks that the model loads once up front.
        pub fn new(config: &VideoConfig) -> Result<Self> {
            let factory = Self {
                model_path: config.model_path.clone(),
                class_names: config.class_names.clone(),
                confidence: config.detector_confidence,
                nms_threshold: config.nms_threshold,
                input_size: config.input_size as i32,
            };
            factory.load()?;
            info!("YOLO model available at {:?}", factory.model_path);
            Ok(factory)
        }

        fn load(&self) -> Result<dnn::Net> {
            let path = self
                .model_path
                .to_str()
                .ok_or_else(|| VisionError::DetectorUnavailable(format!("bad model path {:?}", self.model_path)))?;
            if !self.model_path.is_file() {
                return Err(VisionError::DetectorUnavailable(format!("model not found at {}", path)));
            }
            dnn::read_net_from_onnx(path)
                .map_err(|e| VisionError::DetectorUnavailable(format!("failed to load {}: {}", path, e.message)))
        }
    }

    impl DetectorFactory for YoloDetectorFactory {
        fn create(&self) -> Result<Box<dyn Detector>> {
            Ok(Box::new(YoloDetector {
                net: self.load()?,
                class_names: self.class_names.clone(),
                confidence: self.confidence,
                nms_threshold: self.nms_threshold,
                input_size: self.input_size,
            }))
        }

        fn name(&self) -> &str {
            "yolo-onnx"
        }
    }
}
