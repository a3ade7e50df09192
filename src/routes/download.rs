//! File and directory download.
//!
//! A file is streamed as-is with its digest in `X-File-Hash`. A directory is
//! archived on a blocking thread into an in-memory pipe whose read half is
//! the response body, so the archive is never staged on disk or in memory.
//! Directory downloads get a registry entry (`X-Transfer-ID`) that completes
//! or fails when encoding ends.

use std::io;
use std::path::PathBuf;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::header,
    response::Response,
};
use futures::{stream, StreamExt};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio_util::io::{ReaderStream, SyncIoBridge};
use tracing::{debug, info, warn};

use super::ApiError;
use crate::error::XferError;
use crate::xfer::archive;
use crate::xfer::sanitize::{sanitize, SafePath};
use crate::xfer::types::Direction;
use crate::AppState;

/// Pipe capacity between the archive encoder and the response body.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Query parameters for `GET /api/download`.
#[derive(Deserialize)]
pub struct DownloadQuery {
    /// File or directory relative to the storage root. Required; `.` names
    /// the root itself.
    #[serde(default)]
    pub path: Option<String>,
}

/// `GET /api/download?path=...`: a file as octet-stream, a directory as tar.gz.
pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let raw = query
        .path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| XferError::InvalidRequest("path parameter required".into()))?;
    let rel = sanitize(&raw)?;
    let target = rel.resolve(state.storage());
    let meta = tokio::fs::metadata(&target)
        .await
        .map_err(|e| XferError::io_at("stat", &target, e))?;

    if meta.is_dir() {
        download_dir(state, rel, target).await
    } else {
        download_file(state, rel, target, meta.len()).await
    }
}

async fn download_file(
    state: AppState,
    rel: SafePath,
    target: PathBuf,
    size: u64,
) -> Result<Response, ApiError> {
    let digest = state.hasher.digest_file(&target).await?;
    let file = tokio::fs::File::open(&target)
        .await
        .map_err(|e| XferError::io_at("open", &target, e))?;

    info!(path = %rel, size, hash = %digest, "Serving file");
    let name = rel.file_name().unwrap_or("download");
    Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, attachment(name))
        .header(header::CONTENT_LENGTH, size)
        .header("X-File-Hash", digest.to_string())
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| XferError::io("failed to build response", io::Error::other(e)).into())
}

async fn download_dir(
    state: AppState,
    rel: SafePath,
    target: PathBuf,
) -> Result<Response, ApiError> {
    let handle = state.registry.start(Direction::Download).await;
    let transfer_id = handle.id().to_string();
    let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let sink = SyncIoBridge::new(writer);
    let (outcome_tx, outcome_rx) = oneshot::channel::<Option<String>>();

    info!(transfer_id = %transfer_id, path = %rel, "Streaming directory archive");
    tokio::task::spawn_blocking(move || {
        match archive::measure(&target) {
            Ok(totals) => {
                if let Err(e) = handle.update_blocking(|s| s.set_totals(totals.files, totals.bytes)) {
                    warn!(transfer_id = %handle.id(), "Status entry vanished: {e}");
                }
            }
            Err(e) => debug!(transfer_id = %handle.id(), "Could not measure directory: {e}"),
        }
        let result = archive::encode(&target, sink, |entry| {
            if let Err(e) = handle.update_blocking(|s| s.record_file(entry.size)) {
                warn!(transfer_id = %handle.id(), "Status entry vanished: {e}");
            }
        });
        let (outcome, failure) = match result {
            Ok(summary) => {
                info!(
                    transfer_id = %handle.id(),
                    files = summary.files,
                    bytes = summary.bytes,
                    "Directory download complete"
                );
                let outcome = handle.update_blocking(|s| {
                    s.set_totals(summary.files, summary.bytes);
                    s.complete();
                });
                (outcome, None)
            }
            Err(e) => {
                warn!(transfer_id = %handle.id(), "Directory download failed: {e}");
                let message = e.to_string();
                (handle.update_blocking(|s| s.fail(message.clone())), Some(message))
            }
        };
        if let Err(e) = outcome {
            warn!(transfer_id = %handle.id(), "Status entry vanished: {e}");
        }
        // The receiver is gone only if the client already hung up.
        let _ = outcome_tx.send(failure);
    });

    // After the pipe drains, a failed encode ends the body with an error so
    // the response is aborted rather than terminated cleanly.
    let tail = stream::once(outcome_rx).filter_map(|outcome| async move {
        match outcome {
            Ok(None) => None,
            Ok(Some(message)) => Some(Err::<Bytes, _>(io::Error::other(message))),
            Err(_) => Some(Err(io::Error::other("archive encoder stopped"))),
        }
    });
    let body = ReaderStream::new(reader).chain(tail);

    let name = format!("{}.tar.gz", rel.file_name().unwrap_or("storage"));
    Response::builder()
        .header(header::CONTENT_TYPE, "application/gzip")
        .header(header::CONTENT_DISPOSITION, attachment(&name))
        .header("X-Transfer-ID", transfer_id)
        .body(Body::from_stream(body))
        .map_err(|e| XferError::io("failed to build response", io::Error::other(e)).into())
}

/// `Content-Disposition` value; quotes and control characters are dropped.
fn attachment(name: &str) -> String {
    let clean: String = name
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect();
    format!("attachment; filename=\"{clean}\"")
}
