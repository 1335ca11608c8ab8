//! REST command handlers.
//!
//! Each handler decodes its body with [`json_body`], validates the fields it
//! needs and forwards to the [`DownloadManager`](crate::engine::DownloadManager).

use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use tracing::info;

use super::error::ApiError;
use super::models::{
    DownloadRequest, DownloadResponse, HealthResponse, LoadRequest, SettingsPatch, SettingsResponse,
    SuccessResponse, TaskRequest,
};
use super::state::AppState;
use super::utils::json_body;
use super::validation::{require_string, require_string_array, validate_share_url};
use crate::engine::TaskSnapshot;
use crate::remote::ResolvedTree;

/// POST /api/load
pub async fn load_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ResolvedTree>, ApiError> {
    let request: LoadRequest = json_body(&headers, &body)?;
    let url = validate_share_url(request.url.as_deref(), &state.config.remote)?;

    let tree = state.manager.submit(url.as_str()).await?;
    info!(session_id = %tree.session_id, name = %tree.root.name, "share loaded");
    Ok(Json(tree))
}

/// POST /api/download
pub async fn start_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DownloadResponse>, ApiError> {
    let request: DownloadRequest = json_body(&headers, &body)?;
    let file_ids = require_string_array(request.file_ids, "fileIds")?;

    let task_ids = state.manager.enqueue(&file_ids).await?;
    Ok(Json(DownloadResponse { task_ids }))
}

/// POST /api/cancel
pub async fn cancel_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SuccessResponse>, ApiError> {
    let request: TaskRequest = json_body(&headers, &body)?;
    let task_id = require_string(request.task_id, "taskId")?;
    state.manager.cancel(&task_id);
    Ok(Json(SuccessResponse::ok()))
}

/// POST /api/retry
pub async fn retry_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SuccessResponse>, ApiError> {
    let request: TaskRequest = json_body(&headers, &body)?;
    let task_id = require_string(request.task_id, "taskId")?;
    state.manager.retry(&task_id);
    Ok(Json(SuccessResponse::ok()))
}

/// POST /api/retry-failed
pub async fn retry_failed(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.manager.retry_all_failed();
    Json(SuccessResponse::ok())
}

/// POST /api/pause
pub async fn pause_all(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.manager.pause_all();
    Json(SuccessResponse::ok())
}

/// POST /api/resume
pub async fn resume_all(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.manager.resume_all();
    Json(SuccessResponse::ok())
}

/// POST /api/clear
///
/// Pending feed updates are dropped since they may describe cleared tasks;
/// observers get a full status instead.
pub async fn clear_finished(State(state): State<AppState>) -> Json<SuccessResponse> {
    state.manager.clear_finished();
    state.feed.reset();
    Json(SuccessResponse::ok())
}

/// GET /api/status
pub async fn status(State(state): State<AppState>) -> Json<Vec<TaskSnapshot>> {
    Json(state.manager.list_tasks())
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        verify_downloads: state.manager.verify_downloads(),
    })
}

/// PATCH /api/settings
pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SettingsResponse>, ApiError> {
    let patch: SettingsPatch = json_body(&headers, &body)?;
    if let Some(enabled) = patch.verify_downloads.as_ref().and_then(|value| value.as_bool()) {
        state.manager.set_verify_downloads(enabled);
    }
    Ok(Json(SettingsResponse {
        verify_downloads: state.manager.verify_downloads(),
    }))
}

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let manager = &state.manager;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active: manager.active_count(),
        queued: manager.queued(),
        paused: manager.is_paused(),
        counters: manager.metrics().snapshot(),
    })
}
