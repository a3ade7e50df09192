//! Directory listing under the storage root.

use std::time::SystemTime;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::ApiError;
use crate::error::XferError;
use crate::xfer::sanitize::sanitize;
use crate::xfer::types::ListEntry;
use crate::AppState;

/// Query parameters for `GET /api/list`.
#[derive(Deserialize)]
pub struct ListQuery {
    /// Directory relative to the storage root (default: the root).
    #[serde(default)]
    pub path: String,
}

/// `GET /api/list?path=...`: entries of one directory, sorted by name.
///
/// | HTTP | Code             | Meaning                        |
/// |------|------------------|--------------------------------|
/// | 400  | `INVALID_PATH`   | Traversal, absolute path, etc. |
/// | 400  | `INVALID_REQUEST`| Path is a file                 |
/// | 404  | `FILE_NOT_FOUND` | Directory does not exist       |
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ListEntry>>, ApiError> {
    let rel = sanitize(&query.path)?;
    let dir = rel.resolve(state.storage());

    let meta = tokio::fs::metadata(&dir)
        .await
        .map_err(|e| XferError::io_at("stat", &dir, e))?;
    if !meta.is_dir() {
        return Err(XferError::InvalidRequest(format!("not a directory: {rel}")).into());
    }

    let mut read_dir = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| XferError::io_at("list", &dir, e))?;
    let mut entries = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| XferError::io_at("list", &dir, e))?
    {
        // Entries removed mid-listing are skipped.
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        entries.push(ListEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mod_time: DateTime::<Utc>::from(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(entries))
}
