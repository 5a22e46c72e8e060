//! Evidence stills for counted strikes

use crate::error::{Result, VisionError};
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat, RgbImage};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use visionsafe_core::{BoundingBox, EvidenceConfig, EvidenceFormat, TrackId};

const RETRY_BACKOFF: Duration = Duration::from_millis(20);

pub struct EvidenceCapturer {
    config: EvidenceConfig,
}

impl EvidenceCapturer {
    pub fn new(config: EvidenceConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self { config })
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Save the worker's region of `frame` and return the final path.
    ///
    /// The still is written under a temporary name and renamed, so a returned
    /// path always points to a complete image.
    pub fn capture(&self, frame: &RgbImage, bbox: &BoundingBox, worker: TrackId, at: DateTime<Utc>) -> Result<PathBuf> {
        let still = self.crop(frame, bbox);
        let attempts = self.config.write_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match self.write_once(&still, worker, at) {
                Ok(path) => {
                    debug!("Evidence for {} saved to {:?}", worker.label(), path);
                    return Ok(path);
                }
                Err(e) => {
                    warn!(
                        "Evidence write for {} failed (attempt {}/{}): {}",
                        worker.label(),
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        std::thread::sleep(RETRY_BACKOFF * (1u32 << attempt.min(5)));
                    }
                }
            }
        }
        Err(VisionError::EvidenceWrite(last_error))
    }

    fn crop(&self, frame: &RgbImage, bbox: &BoundingBox) -> RgbImage {
        if !self.config.crop_to_worker {
            return frame.clone();
        }
        match bbox
            .padded(self.config.crop_padding)
            .clamp_to(frame.width(), frame.height())
        {
            Some(region) => image::imageops::crop_imm(
                frame,
                region.x as u32,
                region.y as u32,
                region.width as u32,
                region.height as u32,
            )
            .to_image(),
            // box entirely off-frame: keep the whole frame as evidence
            None => frame.clone(),
        }
    }

    fn write_once(&self, still: &RgbImage, worker: TrackId, at: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.dir)?;
        let final_path = self.unique_path(worker, at);
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = self.config.dir.join(format!(".{}.tmp", file_name));

        let written = self.encode(still, &tmp_path);
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(final_path)
    }

    fn encode(&self, still: &RgbImage, path: &Path) -> Result<()> {
        match self.config.format {
            EvidenceFormat::Png => {
                still.save_with_format(path, ImageFormat::Png)?;
            }
            EvidenceFormat::Jpeg => {
                let file = fs::File::create(path)?;
                let mut writer = BufWriter::new(file);
                JpegEncoder::new_with_quality(&mut writer, self.config.jpeg_quality).encode(
                    still.as_raw(),
                    still.width(),
                    still.height(),
                    ColorType::Rgb8,
                )?;
            }
        }
        Ok(())
    }

    /// `Worker{id}_{YYYYmmdd-HHMMSS-mmm}.{ext}`, suffixed `_{n}` on collision.
    fn unique_path(&self, worker: TrackId, at: DateTime<Utc>) -> PathBuf {
        let ext = self.config.format.extension();
        let stem = format!("Worker{}_{}", worker, at.format("%Y%m%d-%H%M%S-%3f"));
        let mut path = self.config.dir.join(format!("{}.{}", stem, ext));
        let mut counter = 1;
        while path.exists() {
            path = self.config.dir.join(format!("{}_{}.{}", stem, counter, ext));
            counter += 1;
        }
        path
    }

    /// Resolve a bare file name inside the evidence directory.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        if !is_plain_file_name(file_name) {
            return None;
        }
        let path = self.config.dir.join(file_name);
        path.is_file().then_some(path)
    }

    /// Stored evidence file names, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.config.dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.config.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_file() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete every stored still, returning how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let names = self.list()?;
        for name in &names {
            fs::remove_file(self.config.dir.join(name))?;
        }
        info!("Removed {} evidence files", names.len());
        Ok(names.len())
    }
}

/// A single path component with no traversal or hidden-file tricks.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
        && Path::new(name).file_name().map(|n| n == name).unwrap_or(false)
}
