//! Error types for visionsafe-eye

use thiserror::Error;
use visionsafe_storage::StorageError;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Frame decode error: {0}")]
    FrameDecode(String),

    #[error("Evidence write error: {0}")]
    EvidenceWrite(String),

    #[error("Video error: {0}")]
    Video(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("OpenCV error: {0}")]
    OpenCv(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for VisionError {
    fn from(err: opencv::Error) -> Self {
        VisionError::OpenCv(err.message)
    }
}

pub type Result<T> = std::result::Result<T, VisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::DetectorUnavailable("model missing".to_string());
        assert!(err.to_string().contains("Detector unavailable"));
        assert!(err.to_string().contains("model missing"));
        assert_eq!(VisionError::Cancelled.to_string(), "Job cancelled");
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        assert!(matches!(vision_err, VisionError::Io(_)));
    }

    #[test]
    fn test_vision_error_from_storage() {
        let err: VisionError = StorageError::PersistenceWrite {
            attempts: 3,
            reason: "disk full".to_string(),
        }
        .into();
        assert!(err.to_string().contains("disk full"));
    }
}
