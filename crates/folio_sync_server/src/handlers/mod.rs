pub mod posts;
pub mod sync;

use axum::Router;

use crate::AppState;

/// Every route nested under `/api`.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .merge(sync::sync_routes())
        .merge(posts::post_routes())
        .with_state(state)
}

/// Run engine work off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, crate::error::ApiError>
where
    F: FnOnce(&folio_core::SyncEngine) -> folio_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| crate::error::ApiError::Internal(format!("worker task failed: {e}")))?
        .map_err(Into::into)
}
