//! Error taxonomy shared by the request flows and its mapping onto HTTP
//! responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures surfaced to HTTP callers. Every variant carries the human readable
/// message that ends up in the `{"error": ...}` payload.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The extraction engine raised or returned unusable data.
    #[error("Failed to fetch video info: {0}")]
    MetadataFetchFailed(String),
    /// The engine failed mid-download or the artifact never appeared.
    #[error("Download failed: {0}")]
    DownloadFailed(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Health check failed: {0}")]
    HealthCheckFailed(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MetadataFetchFailed(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DownloadFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HealthCheckFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
