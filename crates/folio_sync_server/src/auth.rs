//! Bearer-token gate for the `/api` routes.
//!
//! The router carries an [`AuthExtractor`] extension holding the configured
//! token; handlers opt in by taking a [`RequireAuth`] argument.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Holds the token requests are checked against.
#[derive(Clone)]
pub struct AuthExtractor {
    token: Arc<str>,
}

impl AuthExtractor {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Arc::from(token.into()),
        }
    }

    /// Whether `candidate` matches the configured token.
    pub fn verify(&self, candidate: &str) -> bool {
        constant_time_eq(self.token.as_bytes(), candidate.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

/// Extractor that rejects the request unless it carries the API token.
pub struct RequireAuth;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// No extractor installed on the router.
    NotConfigured,
    MissingToken,
    InvalidToken,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthRejection::NotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authentication is not configured",
            ),
            AuthRejection::MissingToken => (StatusCode::UNAUTHORIZED, "Missing bearer token"),
            AuthRejection::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid bearer token"),
        };
        let body = axum::Json(serde_json::json!({
            "error": "unauthorized",
            "message": message,
        }));
        (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let extractor = parts
            .extensions
            .get::<AuthExtractor>()
            .cloned()
            .ok_or(AuthRejection::NotConfigured)?;
        let token = bearer_token(parts).ok_or(AuthRejection::MissingToken)?;
        if !extractor.verify(token) {
            debug!("Rejected request to {} with a bad token", parts.uri.path());
            return Err(AuthRejection::InvalidToken);
        }
        Ok(RequireAuth)
    }
}
