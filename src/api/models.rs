//! Request and response bodies. All JSON is camelCase.
//!
//! Request fields are optional at the serde level so that a missing field is
//! reported by [`super::validation`] with the field's name rather than as a
//! generic decode error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::TaskId;
use crate::observability::MetricsSnapshot;

#[derive(Debug, Default, Deserialize)]
pub struct LoadRequest {
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub file_ids: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: Option<Value>,
}

/// Non-boolean values are ignored and leave the setting unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub verify_downloads: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResponse {
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub verify_downloads: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active: usize,
    pub queued: usize,
    pub paused: bool,
    pub counters: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
