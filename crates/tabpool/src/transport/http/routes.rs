//! HTTP route handlers.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::driver::Attachment;
use crate::error::PoolError;
use crate::pool::{AcquireOutcome, SlotPool};
use crate::slot::SlotId;
use crate::status::PoolSnapshot;

pub const LEASE_TOKEN_HEADER: &str = "x-lease-token";

#[derive(Debug, Deserialize)]
pub struct AcquireRequest {
    pub owner: String,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub message: String,
    /// Text files embedded into the message itself, each under a
    /// `=== filename ===` header. Not uploaded; no count limit.
    #[serde(default)]
    pub merge_paths: Vec<PathBuf>,
    /// Files handed to the driver as individual uploads. Bounded per send.
    #[serde(default)]
    pub file_paths: Vec<PathBuf>,
}

async fn acquire_session(
    State(pool): State<Arc<SlotPool>>,
    body: Option<Json<AcquireRequest>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(Json(request)) = body else {
        return bad_request("request body with owner is required");
    };

    match pool.acquire(request.owner.trim()) {
        Ok(AcquireOutcome::Acquired {
            slot_id,
            token,
            reattached,
        }) => (
            StatusCode::OK,
            Json(json!({
                "status": "acquired",
                "slot_id": slot_id,
                "lease_token": token,
                "reattached": reattached,
                "expires_after_inactive_s": pool.inactivity_timeout().as_secs(),
            })),
        ),
        Ok(AcquireOutcome::Queued {
            position,
            estimated_wait,
        }) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "queued",
                "position": position,
                "estimated_wait_s": estimated_wait.as_secs(),
            })),
        ),
        Ok(AcquireOutcome::Rejected {
            total_slots,
            queue_depth,
            queue_max,
        }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "rejected",
                "reason": "all slots are leased and the wait queue is full",
                "total_slots": total_slots,
                "queue_depth": queue_depth,
                "queue_max": queue_max,
            })),
        ),
        Err(e) => error_response(e),
    }
}

async fn send_message(
    State(pool): State<Arc<SlotPool>>,
    Path(slot_id): Path<usize>,
    headers: HeaderMap,
    body: Option<Json<SendRequest>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(token) = lease_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "X-Lease-Token header is required" })),
        );
    };
    let token = token.to_string();
    let Some(Json(request)) = body else {
        return bad_request("request body with message is required");
    };

    let max_files = pool.max_files_per_send();
    if request.file_paths.len() > max_files {
        return bad_request(format!(
            "maximum {max_files} file uploads per send (got {})",
            request.file_paths.len()
        ));
    }

    for path in request.merge_paths.iter().chain(&request.file_paths) {
        if !path.exists() {
            return bad_request(format!("File not found: {}", path.display()));
        }
    }

    let message = match merge_text_content(&request.merge_paths) {
        Ok(Some(merged)) => format!("{merged}\n\n{}", request.message),
        Ok(None) => request.message,
        Err(detail) => return bad_request(detail),
    };
    let attachments = match collect_attachments(&request.file_paths) {
        Ok(attachments) => attachments,
        Err(detail) => return bad_request(detail),
    };

    let started = Instant::now();
    match pool.send(SlotId(slot_id), &token, &message, &attachments).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(json!({
                "response": reply,
                "duration_ms": started.elapsed().as_millis() as u64,
            })),
        ),
        Err(e) => error_response(e),
    }
}

async fn release_session(
    State(pool): State<Arc<SlotPool>>,
    Path(slot_id): Path<usize>,
    headers: HeaderMap,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(token) = lease_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "X-Lease-Token header is required" })),
        );
    };

    match pool.release(SlotId(slot_id), token) {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "released" }))),
        Err(e) => error_response(e),
    }
}

async fn pool_status(State(pool): State<Arc<SlotPool>>) -> Json<PoolSnapshot> {
    Json(pool.snapshot())
}

async fn reset_pool(State(pool): State<Arc<SlotPool>>) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!("Pool reset requested via HTTP");
    pool.reset_all().await;
    (StatusCode::OK, Json(json!({ "status": "reset" })))
}

async fn reset_slot(
    State(pool): State<Arc<SlotPool>>,
    Path(slot_id): Path<usize>,
) -> (StatusCode, Json<serde_json::Value>) {
    match pool.reset_slot(SlotId(slot_id)).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "reset" }))),
        Err(e) => error_response(e),
    }
}

async fn health_check(State(pool): State<Arc<SlotPool>>) -> (StatusCode, Json<serde_json::Value>) {
    let system = pool.observed_system();
    if system.driver_alive {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unavailable" })),
        )
    }
}

async fn shutdown(State(pool): State<Arc<SlotPool>>) -> (StatusCode, Json<serde_json::Value>) {
    tracing::info!("Shutdown requested via HTTP");
    pool.trigger_shutdown();
    (StatusCode::OK, Json(json!({ "status": "shutting_down" })))
}

fn lease_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(LEASE_TOKEN_HEADER).and_then(|v| v.to_str().ok())
}

fn bad_request(detail: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": detail.into() })))
}

fn error_response(error: PoolError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &error {
        PoolError::InvalidOwner => StatusCode::BAD_REQUEST,
        PoolError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        PoolError::NotFound(_) => StatusCode::NOT_FOUND,
        PoolError::Conflict { .. }
        | PoolError::LoginExpired { .. }
        | PoolError::QuotaExceeded { .. } => StatusCode::CONFLICT,
        PoolError::Gone { .. } => StatusCode::GONE,
        PoolError::DriverTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PoolError::DriverFailure { .. } => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": error.to_string() })))
}

/// Read and concatenate text files, each under a `=== filename ===` header.
/// Returns `None` when there is nothing to merge. Non-UTF-8 content is
/// carried over lossily rather than rejected.
fn merge_text_content(paths: &[PathBuf]) -> Result<Option<String>, String> {
    if paths.is_empty() {
        return Ok(None);
    }

    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("Cannot read file: {} ({e})", path.display()))?;
        let content = String::from_utf8_lossy(&bytes);
        let name = file_name(path);
        parts.push(format!("=== {name} ===\n{content}"));
    }

    let merged = parts.join("\n\n");
    tracing::info!(
        files = paths.len(),
        chars = merged.len(),
        "Merged files into message"
    );
    Ok(Some(merged))
}

fn collect_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>, String> {
    paths
        .iter()
        .map(|path| {
            let metadata = std::fs::metadata(path)
                .map_err(|e| format!("Cannot read file: {} ({e})", path.display()))?;
            if !metadata.is_file() {
                return Err(format!("Not a regular file: {}", path.display()));
            }
            Ok(Attachment {
                path: path.clone(),
                size: metadata.len(),
            })
        })
        .collect()
}

fn file_name(path: &FsPath) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

pub fn routes(pool: Arc<SlotPool>) -> Router {
    Router::new()
        .route("/api/session/acquire", post(acquire_session))
        .route("/api/session/{id}/send", post(send_message))
        .route("/api/session/{id}/release", post(release_session))
        .route("/api/pool/status", get(pool_status))
        .route("/api/pool/reset", post(reset_pool))
        .route("/api/pool/slot/{id}/reset", post(reset_slot))
        .route("/api/health", get(health_check))
        .route("/api/shutdown", post(shutdown))
        .with_state(pool)
}
