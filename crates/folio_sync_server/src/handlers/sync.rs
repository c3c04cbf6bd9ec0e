//! Client sync endpoints: status, commit, download and history.

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State, rejection::JsonRejection},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use folio_core::{
    CommitOutcome, CommitRequest, SnapshotId, SnapshotInfo, SyncManifest, SyncPlan, UploadedFile,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::blocking;
use crate::AppState;
use crate::auth::RequireAuth;
use crate::error::ApiError;

const DEFAULT_HISTORY_COUNT: usize = 20;
const MAX_HISTORY_COUNT: usize = 100;

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/sync/status", post(sync_status))
        .route(
            "/sync/commit",
            post(sync_commit).layer(DefaultBodyLimit::disable()),
        )
        .route("/sync/files/{*path}", get(download_file))
        .route("/history", get(history))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub manifest: SyncManifest,
}

/// POST /api/sync/status
async fn sync_status(
    State(state): State<AppState>,
    _auth: RequireAuth,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<SyncPlan>, ApiError> {
    let Json(body) = payload?;
    let plan = blocking(&state, move |engine| engine.status(&body.manifest)).await?;
    Ok(Json(plan))
}

#[derive(Debug, Deserialize)]
pub struct UploadedFileBody {
    pub path: String,
    /// Base64 (standard alphabet) file bytes.
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommitBody {
    pub deleted_files: Vec<String>,
    pub uploaded_files: Vec<UploadedFileBody>,
    pub last_sync_commit: Option<SnapshotId>,
}

impl CommitBody {
    fn decode(self) -> Result<CommitRequest, ApiError> {
        let uploaded_files = self
            .uploaded_files
            .into_iter()
            .map(|file| {
                let content = STANDARD.decode(file.content.as_bytes()).map_err(|e| {
                    ApiError::BadRequest(format!("{}: invalid base64 content: {}", file.path, e))
                })?;
                Ok(UploadedFile {
                    path: file.path,
                    content,
                })
            })
            .collect::<Result<Vec<_>, ApiError>>()?;
        Ok(CommitRequest {
            deleted_files: self.deleted_files,
            uploaded_files,
            last_sync_commit: self.last_sync_commit,
        })
    }
}

/// POST /api/sync/commit
async fn sync_commit(
    State(state): State<AppState>,
    _auth: RequireAuth,
    payload: Result<Json<CommitBody>, JsonRejection>,
) -> Result<Json<CommitOutcome>, ApiError> {
    let Json(body) = payload?;
    let request = body.decode()?;
    info!(
        "Sync commit: {} uploads, {} deletions, last sync {:?}",
        request.uploaded_files.len(),
        request.deleted_files.len(),
        request.last_sync_commit.as_ref().map(SnapshotId::as_str)
    );
    let outcome = blocking(&state, move |engine| engine.commit(request)).await?;
    if !outcome.conflicts.is_empty() {
        warn!(
            "Sync commit {} finished with {} conflicts",
            outcome.new_snapshot_id,
            outcome.conflicts.len()
        );
    }
    Ok(Json(outcome))
}

/// GET /api/sync/files/{*path}
async fn download_file(
    State(state): State<AppState>,
    _auth: RequireAuth,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let file = blocking(&state, move |engine| engine.open_file(&path)).await?;
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub count: Option<usize>,
}

/// GET /api/history?count=N
async fn history(
    State(state): State<AppState>,
    _auth: RequireAuth,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SnapshotInfo>>, ApiError> {
    let count = query
        .count
        .unwrap_or(DEFAULT_HISTORY_COUNT)
        .min(MAX_HISTORY_COUNT);
    let entries = blocking(&state, move |engine| engine.history(count)).await?;
    Ok(Json(entries))
}
