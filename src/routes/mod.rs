//! HTTP route handlers.
//!
//! Each sub-module corresponds to one endpoint. All request paths are
//! relative to the storage root and pass through
//! [`crate::xfer::sanitize::sanitize`] before touching the filesystem.

pub mod download;
pub mod error;
pub mod health;
pub mod list;
pub mod status;
pub mod upload;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::AppState;

/// Build the full API router with tracing, permissive CORS, and the upload body limit.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_size;
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/upload", post(upload::upload))
        .route("/api/download", get(download::download))
        .route("/api/status/{id}", get(status::status))
        .route("/api/list", get(list::list))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
