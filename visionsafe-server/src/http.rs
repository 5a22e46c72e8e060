// HTTP server with the dashboard, upload and job routes

use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;
use visionsafe_core::{EquipmentClass, StrikeLedger, TrackId, VisionSafeConfig, Worker, WorkerState};
use visionsafe_eye::{is_plain_file_name, EvidenceCapturer, JobManager, JobStatus, Metrics, VideoJob};
use visionsafe_storage::{analytics, dashboard_stats, report_stats, LogEntry, StorageError, ViolationStore};

// API state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ViolationStore>,
    pub ledger: Arc<StrikeLedger>,
    pub evidence: Arc<EvidenceCapturer>,
    pub jobs: Arc<JobManager>,
    pub metrics: Arc<Metrics>,
    pub config: Arc<VisionSafeConfig>,
}

// Response types
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub message: String,
    pub video_url: String,
    pub filename: String,
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessedVideosResponse {
    pub videos: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub status: String,
    pub records_removed: usize,
    pub evidence_removed: usize,
}

/// Ledger entry as shown to dashboards
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerView {
    pub id: String,
    pub track_id: TrackId,
    pub state: WorkerState,
    pub strike_count: u32,
    pub max_strikes: u32,
    pub missing_items: Vec<EquipmentClass>,
    pub last_strike_at: Option<DateTime<Utc>>,
}

impl WorkerView {
    fn new(worker: &Worker, max_strikes: u32) -> Self {
        Self {
            id: worker.track_id.label(),
            track_id: worker.track_id,
            state: worker.status(max_strikes).state,
            strike_count: worker.strike_count,
            max_strikes,
            missing_items: worker.missing_items.clone(),
            last_strike_at: worker.last_strike_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn error_response(status: StatusCode, error: impl Into<String>, code: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

fn store_error(e: StorageError) -> Response {
    error!("Violation store read failed: {}", e);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Violation store unavailable",
        "STORE_ERROR",
    )
}

/// Create HTTP router with all API routes
pub fn create_router(state: ApiState) -> Router {
    let max_upload = state.config.video.max_upload_bytes;
    let cors_permissive = state.config.server.cors_permissive;

    let router = Router::new()
        // Health and metrics
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Dashboard
        .route("/stats", get(stats_handler))
        .route("/logs", get(logs_handler))
        .route("/recent", get(recent_handler))
        .route("/report_stats", get(report_stats_handler))
        .route("/analytics", get(analytics_handler))
        .route("/evidence/:filename", get(evidence_handler))
        .route("/clear-database", post(clear_database_handler))
        // Video batch processing
        .route(
            "/upload_video",
            post(upload_video_handler).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/processed_video/:filename", get(processed_video_handler))
        .route("/processed_videos", get(processed_videos_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/:id", get(get_job_handler))
        .route("/jobs/:id/cancel", post(cancel_job_handler))
        // Ledger
        .route("/workers", get(list_workers_handler))
        .route("/workers/:id", get(get_worker_handler))
        .with_state(state);

    if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Health check endpoint
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics endpoint (Prometheus format)
async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let body = crate::metrics::render(&state.metrics, state.ledger.len(), state.store.len().ok());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

async fn stats_handler(State(state): State<ApiState>) -> Response {
    match state.store.all() {
        Ok(records) => Json(dashboard_stats(&records)).into_response(),
        Err(e) => store_error(e),
    }
}

/// Full history unless `limit` is given, newest first
async fn logs_handler(State(state): State<ApiState>, Query(query): Query<LimitQuery>) -> Response {
    let records = match query.limit {
        Some(limit) => state.store.recent(limit),
        None => state.store.all().map(|mut all| {
            all.reverse();
            all
        }),
    };
    match records {
        Ok(records) => Json(records.iter().map(LogEntry::from).collect::<Vec<_>>()).into_response(),
        Err(e) => store_error(e),
    }
}

async fn recent_handler(State(state): State<ApiState>, Query(query): Query<LimitQuery>) -> Response {
    let limit = query.limit.unwrap_or(state.config.server.default_recent_limit);
    match state.store.recent(limit) {
        Ok(records) => Json(records.iter().map(LogEntry::from).collect::<Vec<_>>()).into_response(),
        Err(e) => store_error(e),
    }
}

async fn report_stats_handler(State(state): State<ApiState>) -> Response {
    match state.store.all() {
        Ok(records) => Json(report_stats(&records)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn analytics_handler(State(state): State<ApiState>) -> Response {
    match state.store.all() {
        Ok(records) => Json(analytics(&records)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn evidence_handler(State(state): State<ApiState>, Path(filename): Path<String>) -> Response {
    if !is_plain_file_name(&filename) {
        warn!("Rejected evidence request for {:?}", filename);
        return error_response(StatusCode::BAD_REQUEST, "Invalid file name", "INVALID_FILENAME");
    }
    let Some(path) = state.evidence.resolve(&filename) else {
        return error_response(StatusCode::NOT_FOUND, "Evidence not found", "EVIDENCE_NOT_FOUND");
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&filename))], bytes).into_response(),
        Err(e) => {
            error!("Failed to read evidence {:?}: {}", path, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read evidence", "EVIDENCE_READ_ERROR")
        }
    }
}

async fn clear_database_handler(State(state): State<ApiState>) -> Response {
    let records_removed = match state.store.clear() {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to clear violation store: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to clear records", "CLEAR_ERROR");
        }
    };
    let evidence_removed = match state.evidence.clear() {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to clear evidence: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to clear evidence", "CLEAR_ERROR");
        }
    };
    state.ledger.reset_all();
    info!(
        "Database cleared: {} records, {} evidence files",
        records_removed, evidence_removed
    );
    Json(ClearResponse {
        status: "cleared".to_string(),
        records_removed,
        evidence_removed,
    })
    .into_response()
}

/// Accept a video, run it as a background job and wait briefly for the result
async fn upload_video_handler(State(state): State<ApiState>, mut multipart: Multipart) -> Response {
    let source = match save_upload(&state, &mut multipart).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            return error_response(StatusCode::BAD_REQUEST, "Missing multipart field 'file'", "MISSING_FILE");
        }
        Err(response) => return response,
    };

    let submitted = state.jobs.submit(source);
    let wait = Duration::from_secs(state.config.video.sync_wait_secs);
    let job = state
        .jobs
        .wait(&submitted.job_id, wait)
        .await
        .unwrap_or(submitted);

    upload_response(job)
}

fn upload_response(job: VideoJob) -> Response {
    let filename = job.output_file_name().unwrap_or_default();
    let video_url = format!("/processed_video/{}", filename);
    match job.status {
        JobStatus::Completed => Json(UploadResponse {
            status: "completed".to_string(),
            message: format!(
                "Processed {} frames, {} violations logged",
                job.frames_processed, job.violations_logged
            ),
            video_url,
            filename,
            job_id: job.job_id,
        })
        .into_response(),
        JobStatus::Failed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(UploadResponse {
                status: "failed".to_string(),
                message: job.error.unwrap_or_else(|| "processing failed".to_string()),
                video_url,
                filename,
                job_id: job.job_id,
            }),
        )
            .into_response(),
        JobStatus::Pending | JobStatus::Processing => (
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                status: "processing".to_string(),
                message: format!("Still processing; poll /jobs/{}", job.job_id),
                video_url,
                filename,
                job_id: job.job_id,
            }),
        )
            .into_response(),
    }
}

/// Stream the `file` field to `uploads/video_{id}.{ext}`
async fn save_upload(state: &ApiState, multipart: &mut Multipart) -> Result<Option<PathBuf>, Response> {
    let max_bytes = state.config.video.max_upload_bytes;
    let upload_dir = &state.config.video.upload_dir;

    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!("Malformed multipart upload: {}", e);
                return Err(multipart_error(e));
            }
        };
        if field.name() != Some("file") {
            continue;
        }

        let extension = upload_extension(field.file_name());
        let short_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let path = upload_dir.join(format!("video_{}.{}", short_id, extension));

        let io_error = |e: std::io::Error| {
            error!("Failed to store upload: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to store upload", "UPLOAD_WRITE_ERROR")
        };
        tokio::fs::create_dir_all(upload_dir).await.map_err(io_error)?;
        let mut file = tokio::fs::File::create(&path).await.map_err(io_error)?;

        let mut written = 0usize;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    warn!("Upload interrupted: {}", e);
                    return Err(multipart_error(e));
                }
            };
            written += chunk.len();
            if written > max_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, "Upload too large", "PAYLOAD_TOO_LARGE"));
            }
            file.write_all(&chunk).await.map_err(io_error)?;
        }
        file.flush().await.map_err(io_error)?;

        info!("Received upload {:?} ({} bytes)", path, written);
        return Ok(Some(path));
    }
}

fn multipart_error(e: MultipartError) -> Response {
    let status = e.status();
    let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
        "PAYLOAD_TOO_LARGE"
    } else {
        "INVALID_MULTIPART"
    };
    error_response(status, e.body_text(), code)
}

/// Extension of the client's file name, reduced to something safe to put on disk
fn upload_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| FsPath::new(name).extension())
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string())
}

fn content_type(file_name: &str) -> &'static str {
    let ext = FsPath::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webm" => "video/webm",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

async fn processed_video_handler(State(state): State<ApiState>, Path(filename): Path<String>) -> Response {
    if !is_plain_file_name(&filename) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid file name", "INVALID_FILENAME");
    }
    let path = state.jobs.processed_dir().join(&filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, "Video not found", "VIDEO_NOT_FOUND");
        }
        Err(e) => {
            error!("Failed to open {:?}: {}", path, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to open video", "VIDEO_READ_ERROR");
        }
    };
    (
        [(header::CONTENT_TYPE, content_type(&filename))],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

async fn processed_videos_handler(State(state): State<ApiState>) -> Response {
    let dir = state.jobs.processed_dir();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Json(ProcessedVideosResponse { videos: Vec::new() }).into_response();
        }
        Err(e) => {
            error!("Failed to list {:?}: {}", dir, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list videos", "VIDEO_LIST_ERROR");
        }
    };

    let mut videos = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && !name.starts_with('.') {
            videos.push(name);
        }
    }
    videos.sort();
    Json(ProcessedVideosResponse { videos }).into_response()
}

fn parse_job_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id).map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid job id", "INVALID_JOB_ID"))
}

fn job_not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Job not found", "JOB_NOT_FOUND")
}

async fn list_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.jobs.list())
}

async fn get_job_handler(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.jobs.get(&job_id) {
        Some(job) => Json(job).into_response(),
        None => job_not_found(),
    }
}

async fn cancel_job_handler(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let job_id = match parse_job_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.jobs.cancel(&job_id) {
        Some(job) => Json(job).into_response(),
        None => job_not_found(),
    }
}

async fn list_workers_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let max_strikes = state.ledger.config().max_strikes;
    let workers: Vec<WorkerView> = state
        .ledger
        .snapshot()
        .iter()
        .map(|worker| WorkerView::new(worker, max_strikes))
        .collect();
    Json(workers)
}

/// Accepts `7` or `Worker-7`
async fn get_worker_handler(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    let track_id = match id.parse::<TrackId>() {
        Ok(track_id) => track_id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string(), "INVALID_WORKER_ID"),
    };
    match state.ledger.get(track_id) {
        Some(worker) => Json(WorkerView::new(&worker, state.ledger.config().max_strikes)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Worker not found", "WORKER_NOT_FOUND"),
    }
}
