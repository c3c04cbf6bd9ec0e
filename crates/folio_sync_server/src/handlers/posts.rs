//! Direct post editing, outside the sync protocol.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    routing::put,
};
use folio_core::PostOutcome;
use serde_json::{Value, json};

use super::blocking;
use crate::AppState;
use crate::auth::RequireAuth;
use crate::error::ApiError;

pub fn post_routes() -> Router<AppState> {
    Router::new().route(
        "/posts/{*path}",
        put(write_post)
            .delete(delete_post)
            .layer(DefaultBodyLimit::disable()),
    )
}

/// PUT /api/posts/{*path}
async fn write_post(
    State(state): State<AppState>,
    _auth: RequireAuth,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<Json<PostOutcome>, ApiError> {
    let outcome = blocking(&state, move |engine| engine.write_post(&path, body.to_vec())).await?;
    Ok(Json(outcome))
}

/// DELETE /api/posts/{*path}
async fn delete_post(
    State(state): State<AppState>,
    _auth: RequireAuth,
    Path(path): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let outcome = blocking(&state, move |engine| engine.delete_post(&path)).await?;
    Ok(Json(json!({
        "snapshot_id": outcome.snapshot_id,
        "path": outcome.path,
    })))
}
