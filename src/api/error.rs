use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tracing::error;

use super::models::ErrorResponse;
use super::validation::ShareUrlError;
use crate::engine::EngineError;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("invalid share URL: {0}")]
    InvalidShareUrl(String),
    #[error("share could not be loaded: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) | ApiError::InvalidShareUrl(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::InvalidShareUrl(_) => "INVALID_SHARE_URL",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<ShareUrlError> for ApiError {
    fn from(value: ShareUrlError) -> Self {
        ApiError::InvalidShareUrl(value.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::Remote(err @ (RemoteError::InvalidReference(_) | RemoteError::UnknownShare(_))) => {
                ApiError::InvalidShareUrl(err.to_string())
            }
            EngineError::Remote(err) => ApiError::Upstream(err.to_string()),
            EngineError::Path(err) => ApiError::InvalidPayload(err.to_string()),
            err @ EngineError::Io { .. } => ApiError::Internal(err.to_string()),
        }
    }
}
