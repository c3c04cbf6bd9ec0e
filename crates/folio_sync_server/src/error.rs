//! HTTP mapping for handler failures.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use folio_core::FolioError;
use tracing::error;

/// Error returned by every `/api` handler.
#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the sync engine.
    Core(FolioError),
    /// Request body could not be decoded.
    BadRequest(String),
    /// The blocking worker died.
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Core(FolioError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Core(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Core(e) => match e {
                FolioError::Validation(_) => "validation",
                FolioError::PathEscapesRoot(_) => "path_escapes_root",
                FolioError::MergeBaseUnavailable { .. } => "merge_base_unavailable",
                FolioError::SnapshotNotFound(_) => "snapshot_not_found",
                FolioError::Storage { .. } => "storage",
                FolioError::Snapshot(_) => "snapshot",
                FolioError::Frontmatter { .. } => "frontmatter",
                FolioError::Manifest(_) => "manifest",
                FolioError::NotFound(_) => "not_found",
                FolioError::Config(_) => "config",
            },
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Core(e) => write!(f, "{}", e),
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<FolioError> for ApiError {
    fn from(e: FolioError) -> Self {
        ApiError::Core(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        let body = Json(serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
