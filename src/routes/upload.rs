//! Multipart upload.
//!
//! The request is read completely before anything is written to storage:
//! every `files` part is spooled into a private temp directory and all
//! destinations are validated up front, so a malformed request fails with
//! 400 and leaves storage untouched. The response carries a transfer id; a
//! detached task then verifies the optional digest, moves each part into
//! place, and records progress. The first failure marks the transfer failed
//! and the remaining parts are dropped with the spool.

use std::path::{Path, PathBuf};

use axum::{
    extract::{multipart::Field, Multipart, State},
    Json,
};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::ApiError;
use crate::error::{Result, XferError};
use crate::xfer::hasher::Hasher;
use crate::xfer::registry::TransferHandle;
use crate::xfer::sanitize::{sanitize, SafePath};
use crate::xfer::types::{Direction, FileHash, UploadReceipt};
use crate::AppState;

/// One received `files` part, waiting in the spool.
#[derive(Debug)]
struct SpooledPart {
    file_name: String,
    spooled: PathBuf,
    size: u64,
}

/// `POST /api/upload`: multipart fields `remote_path`, `file_hash`, `files`.
///
/// Returns `{"transfer_id": "...", "status": "started"}`.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Json<UploadReceipt>, ApiError> {
    let spool = tempfile::Builder::new()
        .prefix("dirxfer-spool-")
        .tempdir()
        .map_err(|e| XferError::io("failed to create upload spool", e))?;

    let mut remote_path: Option<String> = None;
    let mut expected: Option<FileHash> = None;
    let mut parts: Vec<SpooledPart> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("remote_path") => {
                let value = field.text().await.map_err(bad_multipart)?;
                remote_path = Some(value).filter(|v| !v.trim().is_empty());
            }
            Some("file_hash") => {
                let value = field.text().await.map_err(bad_multipart)?;
                if !value.trim().is_empty() {
                    expected = Some(value.trim().parse()?);
                }
            }
            Some("files") => {
                let index = parts.len();
                parts.push(spool_part(field, spool.path(), index).await?);
            }
            other => debug!(field = ?other, "Ignoring unknown multipart field"),
        }
    }

    if parts.is_empty() {
        return Err(XferError::InvalidRequest("no files provided".into()).into());
    }
    if expected.is_some() && parts.len() != 1 {
        return Err(XferError::InvalidRequest(
            "file_hash is only accepted with a single file".into(),
        )
        .into());
    }
    let destinations = plan_destinations(remote_path.as_deref(), &parts)?;

    let total_bytes: u64 = parts.iter().map(|p| p.size).sum();
    let handle = state.registry.start(Direction::Upload).await;
    handle
        .update(|s| s.set_totals(parts.len() as u64, total_bytes))
        .await?;
    let transfer_id = handle.id().to_string();

    info!(
        transfer_id = %transfer_id,
        files = parts.len(),
        bytes = total_bytes,
        "Upload received"
    );

    let jobs = parts.into_iter().zip(destinations).collect();
    tokio::spawn(process(state, handle, spool, jobs, expected));

    Ok(Json(UploadReceipt {
        transfer_id,
        status: "started".to_string(),
    }))
}

async fn spool_part(mut field: Field<'_>, spool: &Path, index: usize) -> Result<SpooledPart> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    let spooled = spool.join(format!("part-{index}"));
    let mut file = tokio::fs::File::create(&spooled)
        .await
        .map_err(|e| XferError::io_at("create", &spooled, e))?;

    let mut size = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
        file.write_all(&chunk)
            .await
            .map_err(|e| XferError::io_at("write", &spooled, e))?;
        size += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| XferError::io_at("write", &spooled, e))?;

    Ok(SpooledPart {
        file_name,
        spooled,
        size,
    })
}

/// Map each part to its destination under the storage root.
///
/// - one part: `remote_path` is the destination file; without it, or when it
///   ends in `/` or names the root, the part's file name is used under it.
/// - several parts: `remote_path` is a directory and each file name is joined
///   under it.
fn plan_destinations(remote_path: Option<&str>, parts: &[SpooledPart]) -> Result<Vec<SafePath>> {
    let base = sanitize(remote_path.unwrap_or_default())?;
    let names_dir = remote_path.map_or(true, |p| p.ends_with('/') || p.ends_with('\\'));
    if parts.len() == 1 && !names_dir && !base.is_root() {
        return Ok(vec![base]);
    }

    parts
        .iter()
        .map(|part| {
            if part.file_name.is_empty() {
                return Err(XferError::InvalidRequest("file part has no file name".into()));
            }
            let dest = base.join(&part.file_name)?;
            if dest == base {
                return Err(XferError::invalid_path(&part.file_name, "names no file"));
            }
            Ok(dest)
        })
        .collect()
}

/// Move spooled parts into storage in order, stopping at the first failure.
async fn process(
    state: AppState,
    handle: TransferHandle,
    spool: TempDir,
    jobs: Vec<(SpooledPart, SafePath)>,
    expected: Option<FileHash>,
) {
    let result = store_all(state.storage(), &handle, &jobs, expected.as_ref()).await;
    let outcome = match result {
        Ok(()) => {
            info!(transfer_id = %handle.id(), files = jobs.len(), "Upload complete");
            handle.update(|s| s.complete()).await
        }
        Err(e) => {
            warn!(transfer_id = %handle.id(), code = e.code(), "Upload failed: {e}");
            handle.update(|s| s.fail(e.to_string())).await
        }
    };
    if let Err(e) = outcome {
        warn!(transfer_id = %handle.id(), "Status entry vanished: {e}");
    }
    if let Err(e) = spool.close() {
        warn!(transfer_id = %handle.id(), "Failed to remove upload spool: {e}");
    }
}

async fn store_all(
    storage: &Path,
    handle: &TransferHandle,
    jobs: &[(SpooledPart, SafePath)],
    expected: Option<&FileHash>,
) -> Result<()> {
    for (part, dest) in jobs {
        if let Some(expected) = expected {
            let actual = Hasher::new(expected.algorithm)
                .digest_file(&part.spooled)
                .await?;
            expected.check(&actual)?;
        }

        let target = dest.resolve(storage);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| XferError::io_at("create directory", parent, e))?;
        }
        move_file(&part.spooled, &target).await?;
        debug!(transfer_id = %handle.id(), path = %dest, size = part.size, "Stored");
        handle.update(|s| s.record_file(part.size)).await?;
    }
    Ok(())
}

/// Rename, falling back to copy when the spool is on another filesystem.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .map_err(|e| XferError::io_at("write", to, e))?;
    // The spool directory is removed afterwards anyway.
    let _ = tokio::fs::remove_file(from).await;
    Ok(())
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> XferError {
    XferError::InvalidRequest(format!("malformed multipart body: {e}"))
}
