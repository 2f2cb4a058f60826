use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{StatusCode, Uri},
    routing::any,
};
use pullhook_core::AppError;
use pullhook_github::MAX_PAYLOAD_SIZE;

use crate::AppState;

pub mod webhook;

/// Everything is served from the root path; any other path is a 404.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", any(webhook::root).layer(DefaultBodyLimit::max(MAX_PAYLOAD_SIZE)))
        .fallback(not_found)
}

async fn not_found(uri: Uri) -> AppError {
    tracing::warn!("- Unexpected path {}", uri.path());
    AppError::Status(StatusCode::NOT_FOUND)
}
