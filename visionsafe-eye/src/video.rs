//! Video decode/encode seams

use crate::annotate::Overlay;
use crate::error::{Result, VisionError};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// As reported by the container; may be 0 when unknown
    pub total_frames: u64,
}

impl VideoMetadata {
    /// Frame rate to use for timing, falling back to 30 when the container lies.
    pub fn effective_fps(&self) -> f64 {
        if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            30.0
        }
    }
}

/// Outcome of reading the next frame
#[derive(Debug)]
pub enum FrameRead {
    Frame(RgbImage),
    /// The frame exists but could not be decoded
    Corrupt(String),
    End,
}

pub trait FrameSource: Send {
    fn metadata(&self) -> VideoMetadata;

    /// Errors are unrecoverable; per-frame decode problems come back as `FrameRead::Corrupt`.
    fn next_frame(&mut self) -> Result<FrameRead>;
}

pub trait FrameSink: Send {
    /// Append one frame. `overlays` are already drawn; sinks that can render text use the labels.
    fn write_frame(&mut self, frame: &RgbImage, overlays: &[Overlay]) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// Opens sources and sinks for a file format family.
pub trait VideoBackend: Send + Sync {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>>;

    fn create_sink(&self, path: &Path, metadata: &VideoMetadata) -> Result<Box<dyn FrameSink>>;
}

/// Backend for builds without a native codec; every open fails.
pub struct UnsupportedVideoBackend;

impl VideoBackend for UnsupportedVideoBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Err(VisionError::Video(format!(
            "Cannot decode {:?}: built without the opencv feature",
            path
        )))
    }

    fn create_sink(&self, path: &Path, _metadata: &VideoMetadata) -> Result<Box<dyn FrameSink>> {
        Err(VisionError::Video(format!(
            "Cannot encode {:?}: built without the opencv feature",
            path
        )))
    }
}

#[cfg(feature = "opencv")]
pub use self::opencv_backend::OpenCvBackend;

#[cfg(feature = "opencv")]
pub(crate) mod opencv_backend {
    use super::*;
    use opencv::{
        core::{Mat, Point, Scalar, Size},
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture, VideoWriter},
    };
    use tracing::{debug, info};

    /// OpenCV `VideoCapture`/`VideoWriter` backend
    pub struct OpenCvBackend {
        fourcc: String,
    }

    impl OpenCvBackend {
        pub fn new(fourcc: impl Into<String>) -> Self {
            Self { fourcc: fourcc.into() }
        }
    }

    impl VideoBackend for OpenCvBackend {
        fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
            let path_str = path
                .to_str()
                .ok_or_else(|| VisionError::Video(format!("Non UTF-8 path: {:?}", path)))?;
            let cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)?;
            if !cap.is_opened()? {
                return Err(VisionError::Video(format!("Cannot open video {:?}", path)));
            }

            let metadata = VideoMetadata {
                fps: cap.get(videoio::CAP_PROP_FPS).unwrap_or(0.0),
                width: cap.get(videoio::CAP_PROP_FRAME_WIDTH).unwrap_or(0.0).max(0.0) as u32,
                height: cap.get(videoio::CAP_PROP_FRAME_HEIGHT).unwrap_or(0.0).max(0.0) as u32,
                total_frames: cap.get(videoio::CAP_PROP_FRAME_COUNT).unwrap_or(0.0).max(0.0) as u64,
            };
            info!(
                "Opened {:?}: {}x{} @ {:.2}fps, {} frames",
                path, metadata.width, metadata.height, metadata.fps, metadata.total_frames
            );

            Ok(Box::new(OpenCvSource {
                cap,
                metadata,
                position: 0,
            }))
        }

        fn create_sink(&self, path: &Path, metadata: &VideoMetadata) -> Result<Box<dyn FrameSink>> {
            let path_str = path
                .to_str()
                .ok_or_else(|| VisionError::Video(format!("Non UTF-8 path: {:?}", path)))?;
            let code: Vec<char> = self.fourcc.chars().collect();
            if code.len() != 4 {
                return Err(VisionError::Video(format!("Invalid fourcc {:?}", self.fourcc)));
            }
            let fourcc = VideoWriter::fourcc(code[0], code[1], code[2], code[3])?;
            let size = Size::new(metadata.width as i32, metadata.height as i32);
            let writer = VideoWriter::new(path_str, fourcc, metadata.effective_fps(), size, true)?;
            if !writer.is_opened()? {
                return Err(VisionError::Video(format!(
                    "Cannot open encoder {} for {:?}",
                    self.fourcc, path
                )));
            }
            Ok(Box::new(OpenCvSink { writer, size }))
        }
    }

    struct OpenCvSource {
        cap: VideoCapture,
        metadata: VideoMetadata,
        position: u64,
    }

    impl FrameSource for OpenCvSource {
        fn metadata(&self) -> VideoMetadata {
            self.metadata
        }

        fn next_frame(&mut self) -> Result<FrameRead> {
            let mut mat = Mat::default();
            let read = match self.cap.read(&mut mat) {
                Ok(read) => read,
                Err(e) => {
                    self.position += 1;
                    return Ok(FrameRead::Corrupt(e.message));
                }
            };
            if !read {
                return Ok(FrameRead::End);
            }
            self.position += 1;
            if mat.empty() {
                return Ok(FrameRead::Corrupt(format!("empty frame at {}", self.position)));
            }
            match mat_to_rgb(&mat) {
                Ok(img) => Ok(FrameRead::Frame(img)),
                Err(e) => Ok(FrameRead::Corrupt(e.to_string())),
            }
        }
    }

    struct OpenCvSink {
        writer: VideoWriter,
        size: Size,
    }

    impl FrameSink for OpenCvSink {
        fn write_frame(&mut self, frame: &RgbImage, overlays: &[Overlay]) -> Result<()> {
            let mut bgr = rgb_to_mat(frame)?;
            if bgr.cols() != self.size.width || bgr.rows() != self.size.height {
                let mut resized = Mat::default();
                imgproc::resize(&bgr, &mut resized, self.size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
                bgr = resized;
            }
            for overlay in overlays {
                let origin = Point::new(overlay.bbox.x.max(0.0) as i32 + 2, (overlay.bbox.y as i32 - 3).max(11));
                imgproc::put_text(
                    &mut bgr,
                    &overlay.label,
                    origin,
                    imgproc::FONT_HERSHEY_SIMPLEX,
                    0.4,
                    Scalar::new(255.0, 255.0, 255.0, 0.0),
                    1,
                    imgproc::LINE_AA,
                    false,
                )?;
            }
            self.writer.write(&bgr)?;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.writer.release()?;
            debug!("Encoder released");
            Ok(())
        }
    }

    pub(crate) fn mat_to_rgb(mat: &Mat) -> Result<RgbImage> {
        let mut rgb = Mat::default();
        imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = if rgb.is_continuous() {
            rgb.data_bytes()?.to_vec()
        } else {
            rgb.try_clone()?.data_bytes()?.to_vec()
        };
        RgbImage::from_raw(width, height, data)
            .ok_or_else(|| VisionError::FrameDecode(format!("bad buffer for {}x{} frame", width, height)))
    }

    pub(crate) fn rgb_to_mat(frame: &RgbImage) -> Result<Mat> {
        let flat = Mat::from_slice(frame.as_raw())?;
        let shaped = flat.reshape(3, frame.height() as i32)?;
        let mut bgr = Mat::default();
        imgproc::cvt_color(&shaped, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
        Ok(bgr)
    }
}
