//! Shared fixtures: an in-memory server with scripted video and detector fakes

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use image::{Rgb, RgbImage};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;
use visionsafe_core::{
    BoundingBox, Detection, EquipmentClass, StorageBackend, TrackId, ViolationKind, ViolationRecord, VisionSafeConfig,
};
use visionsafe_eye::{
    Detector, DetectorFactory, FrameRead, FrameSink, FrameSource, Overlay, Result, VideoBackend, VideoMetadata,
};
use visionsafe_server::{build_state, create_router, ApiState};
use visionsafe_storage::{MemoryViolationStore, ViolationStore};

pub const FRAME_SIZE: u32 = 64;

/// Source producing `frames` grey frames
pub struct StillSource {
    remaining: u64,
    metadata: VideoMetadata,
}

impl FrameSource for StillSource {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn next_frame(&mut self) -> Result<FrameRead> {
        if self.remaining == 0 {
            return Ok(FrameRead::End);
        }
        self.remaining -= 1;
        Ok(FrameRead::Frame(RgbImage::from_pixel(FRAME_SIZE, FRAME_SIZE, Rgb([90, 90, 90]))))
    }
}

/// Writes one byte per frame so the output file is non-empty
pub struct ByteSink {
    file: std::fs::File,
}

impl FrameSink for ByteSink {
    fn write_frame(&mut self, _frame: &RgbImage, _overlays: &[Overlay]) -> Result<()> {
        self.file.write_all(b"f")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

pub struct StillBackend {
    pub frames: u64,
}

impl VideoBackend for StillBackend {
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        // the upload must exist even though its bytes are ignored
        std::fs::metadata(path)?;
        Ok(Box::new(StillSource {
            remaining: self.frames,
            metadata: VideoMetadata {
                fps: 30.0,
                width: FRAME_SIZE,
                height: FRAME_SIZE,
                total_frames: self.frames,
            },
        }))
    }

    fn create_sink(&self, path: &Path, _metadata: &VideoMetadata) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(ByteSink {
            file: std::fs::File::create(path)?,
        }))
    }
}

/// Sees worker 1 wearing nothing
pub struct BarePersonDetector;

impl Detector for BarePersonDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        Ok(vec![Detection::new(
            Some(TrackId(1)),
            "person",
            BoundingBox::new(10.0, 10.0, 20.0, 40.0),
            0.95,
        )])
    }
}

pub struct BarePersonFactory;

impl DetectorFactory for BarePersonFactory {
    fn create(&self) -> Result<Box<dyn Detector>> {
        Ok(Box::new(BarePersonDetector))
    }

    fn name(&self) -> &str {
        "bare-person"
    }
}

pub struct TestServer {
    pub state: ApiState,
    pub store: Arc<MemoryViolationStore>,
    pub dir: tempfile::TempDir,
}

impl TestServer {
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }
}

pub fn test_config(dir: &Path) -> VisionSafeConfig {
    let mut config = VisionSafeConfig::default();
    config.set_data_dir(dir);
    config.storage.backend = StorageBackend::Memory;
    config.video.require_detector = false;
    config.video.sync_wait_secs = 10;
    config
}

pub fn test_server() -> TestServer {
    test_server_with(|_| {})
}

pub fn test_server_with(tweak: impl FnOnce(&mut VisionSafeConfig)) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    tweak(&mut config);
    let store = Arc::new(MemoryViolationStore::new());
    let state = build_state(
        config,
        store.clone(),
        Arc::new(StillBackend { frames: 12 }),
        Arc::new(BarePersonFactory),
    )
    .unwrap();
    TestServer { state, store, dir }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn record(worker: u64, items: &[&str], minutes: i64) -> ViolationRecord {
    ViolationRecord {
        worker_id: TrackId(worker),
        missing_items: items.iter().map(|i| EquipmentClass::new(*i)).collect(),
        timestamp: base_time() + Duration::minutes(minutes),
        strike_count: 1,
        evidence_path: None,
        kind: ViolationKind::Strike,
    }
}

pub fn seed(store: &dyn ViolationStore, records: &[ViolationRecord]) {
    for r in records {
        store.append(r).unwrap();
    }
}

pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

pub async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    send(router, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = get(router, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

pub async fn post_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = send(
        router,
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap(),
    )
    .await;
    (status, serde_json::from_slice(&body).unwrap())
}

/// Multipart body with a single field
pub fn multipart(field: &str, file_name: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = "visionsafe-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}
