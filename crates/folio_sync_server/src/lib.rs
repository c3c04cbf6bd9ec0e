//! HTTP front end for the Folio sync engine.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod notifier;

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use folio_core::SyncEngine;
use tower_http::trace::TraceLayer;

use crate::auth::AuthExtractor;
use crate::handlers::api_routes;

/// Shared application context handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SyncEngine>,
}

/// Health check plus the authenticated `/api` tree.
pub fn build_router(state: AppState, auth: AuthExtractor) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .nest("/api", api_routes(state))
        .layer(Extension(auth))
        .layer(TraceLayer::new_for_http())
}
