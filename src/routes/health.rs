//! Health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health`: liveness probe.
///
/// Returns status, version, uptime, the storage root, and the number of
/// transfer statuses currently held.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let transfers = state.registry.len().await;

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
        "storage_path": state.config.storage_path,
        "transfers": transfers,
    }))
}
