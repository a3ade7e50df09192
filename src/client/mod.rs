//! HTTP client for the dirxfer server.
//!
//! [`XferClient`] wraps `reqwest::Client` and provides typed methods for each
//! endpoint plus the folder-level operations built on them: uploads fan out
//! through the [`Dispatcher`], directory downloads decode the server's tar.gz
//! stream as it arrives.
//!
//! ## Error handling
//!
//! Non-2xx responses are parsed for an `error` field in the JSON body and
//! returned as [`XferError::Remote`]. If parsing fails, the raw body is used
//! as the message.

pub mod dispatcher;
pub mod progress;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};
use tracing::{debug, info, warn};

pub use dispatcher::{collect_files, Dispatcher, FileJob};
pub use progress::{ProgressCallback, TransferProgress};

use crate::config::ClientConfig;
use crate::error::{Result, XferError};
use crate::xfer::archive;
use crate::xfer::hasher::Hasher;
use crate::xfer::sanitize::{sanitize, SafePath};
use crate::xfer::types::{FileHash, ListEntry, TransferState, TransferStatus, UploadReceipt};

/// HTTP client for one dirxfer server.
#[derive(Clone)]
pub struct XferClient {
    http: reqwest::Client,
    base_url: String,
    config: ClientConfig,
    hasher: Hasher,
}

impl XferClient {
    /// Create a client for the server at `config.server_url`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("dirxfer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout())
            .build()?;
        // Strip trailing slash for consistent URL construction
        let base_url = config.server_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            hasher: Hasher::new(config.hash_algorithm),
            config,
        })
    }

    /// The server's base URL (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn endpoint_with_path(&self, path: &str, remote: &SafePath) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.endpoint(path))
            .map_err(|e| XferError::Config(format!("invalid server URL {}: {e}", self.base_url)))?;
        // The server requires a non-empty `path`; `.` names the storage root.
        let value = if remote.is_root() { "." } else { remote.as_str() };
        url.query_pairs_mut().append_pair("path", value);
        Ok(url)
    }

    /// `GET /api/health`: liveness probe.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let resp = self.http.get(self.endpoint("/api/health")).send().await?;
        Self::handle_response(resp).await
    }

    /// `GET /api/list`: entries of a remote directory.
    pub async fn list(&self, remote: &str) -> Result<Vec<ListEntry>> {
        let url = self.endpoint_with_path("/api/list", &sanitize(remote)?)?;
        let resp = self.http.get(url).send().await?;
        Self::handle_response(resp).await
    }

    /// `GET /api/status/{id}`: snapshot of a server-side transfer.
    pub async fn status(&self, transfer_id: &str) -> Result<TransferStatus> {
        let resp = self
            .http
            .get(self.endpoint(&format!("/api/status/{transfer_id}")))
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    /// Poll a transfer until it is terminal. A failed transfer is an error.
    pub async fn wait_for(&self, transfer_id: &str) -> Result<TransferStatus> {
        loop {
            let status = self.status(transfer_id).await?;
            match status.status {
                TransferState::Running => tokio::time::sleep(self.config.poll_interval()).await,
                TransferState::Completed => return Ok(status),
                TransferState::Failed => {
                    return Err(XferError::Remote {
                        status: 500,
                        message: format!(
                            "transfer {transfer_id} failed: {}",
                            status.error.as_deref().unwrap_or("unknown error")
                        ),
                    })
                }
            }
        }
    }

    /// Upload one file to `remote` (a file path relative to the server's storage).
    ///
    /// The body is streamed from disk. The local digest travels as
    /// `file_hash` so the server can verify what it stored.
    pub async fn upload_file(&self, local: &Path, remote: &str) -> Result<UploadReceipt> {
        let dest = sanitize(remote)?;
        if dest.is_root() {
            return Err(XferError::InvalidRequest(format!(
                "remote path {remote:?} names no file"
            )));
        }

        let digest = self.hasher.digest_file(local).await?;
        let file = tokio::fs::File::open(local)
            .await
            .map_err(|e| XferError::io_at("open", local, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| XferError::io_at("stat", local, e))?
            .len();
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .or_else(|| dest.file_name().map(str::to_string))
            .unwrap_or_default();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, size)
            .file_name(file_name)
            .mime_str("application/octet-stream")?;
        let form = Form::new()
            .text("remote_path", dest.as_str().to_string())
            .text("file_hash", digest.to_string())
            .part("files", part);

        let resp = self
            .http
            .post(self.endpoint("/api/upload"))
            .multipart(form)
            .send()
            .await?;
        let receipt: UploadReceipt = Self::handle_response(resp).await?;
        debug!(local = %local.display(), remote = %dest, size, transfer_id = %receipt.transfer_id, "Uploaded");

        if self.config.wait_for_server {
            self.wait_for(&receipt.transfer_id).await?;
        }
        Ok(receipt)
    }

    /// Upload every file under `local` to the remote directory `remote`,
    /// `config.concurrency` files at a time.
    pub async fn upload_folder(
        &self,
        local: &Path,
        remote: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<TransferProgress> {
        let base = sanitize(remote)?;
        let files = collect_files(local)?;
        info!(
            local = %local.display(),
            remote = %base,
            files = files.len(),
            concurrency = self.config.concurrency,
            "Uploading folder"
        );

        let client = self.clone();
        let progress = Dispatcher::new(self.config.concurrency)
            .run(
                local,
                files,
                move |job: FileJob| {
                    let client = client.clone();
                    let dest = base.join(job.relative.as_str());
                    async move {
                        let dest = dest?;
                        client.upload_file(&job.local, dest.as_str()).await.map(|_| ())
                    }
                },
                on_progress,
            )
            .await?;

        info!(
            files = progress.processed_files,
            bytes = progress.processed_bytes,
            "Folder upload complete"
        );
        Ok(progress)
    }

    /// Download one remote file to `local`, verifying `X-File-Hash` when present.
    ///
    /// Returns the number of bytes written. A digest mismatch is an error; the
    /// written file is left in place for inspection.
    pub async fn download_file(&self, remote: &str, local: &Path) -> Result<u64> {
        let url = self.endpoint_with_path("/api/download", &sanitize(remote)?)?;
        let resp = Self::check(self.http.get(url).send().await?).await?;
        if is_archive(resp.headers()) {
            return Err(XferError::InvalidRequest(format!(
                "{remote} is a directory"
            )));
        }
        let expected: Option<FileHash> = resp
            .headers()
            .get("X-File-Hash")
            .and_then(|v| v.to_str().ok())
            .map(str::parse)
            .transpose()?;

        create_parent(local).await?;
        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| XferError::io_at("create", local, e))?;
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| XferError::io_at("write", local, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| XferError::io_at("write", local, e))?;
        drop(file);

        if let Some(expected) = expected {
            let actual = Hasher::new(expected.algorithm).digest_file(local).await?;
            if let Err(e) = expected.check(&actual) {
                warn!(remote, local = %local.display(), "Downloaded file failed verification: {e}");
                return Err(e);
            }
        }
        debug!(remote, local = %local.display(), bytes = written, "Downloaded");
        Ok(written)
    }

    /// Download a remote directory as tar.gz and extract it into `local`.
    ///
    /// Entries are written as they arrive; nothing is staged.
    pub async fn download_folder(
        &self,
        remote: &str,
        local: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<TransferProgress> {
        let url = self.endpoint_with_path("/api/download", &sanitize(remote)?)?;
        let resp = Self::check(self.http.get(url).send().await?).await?;
        if !is_archive(resp.headers()) {
            return Err(XferError::InvalidRequest(format!(
                "{remote} is not a directory"
            )));
        }

        // The server measures the tree before streaming; use its totals when ready.
        let mut initial = TransferProgress::default();
        if let Some(id) = resp.headers().get("X-Transfer-ID").and_then(|v| v.to_str().ok()) {
            if let Ok(status) = self.status(id).await {
                initial.total_files = status.total_files;
                initial.total_bytes = status.total_size;
            }
        }

        tokio::fs::create_dir_all(local)
            .await
            .map_err(|e| XferError::io_at("create directory", local, e))?;

        let stream = Box::pin(resp.bytes_stream().map_err(io::Error::other));
        let reader = SyncIoBridge::new(StreamReader::new(stream));
        let dest = local.to_path_buf();

        let progress = tokio::task::spawn_blocking(move || -> Result<TransferProgress> {
            let mut progress = initial;
            archive::decode(reader, &dest, |entry| {
                progress.processed_files += 1;
                progress.processed_bytes += entry.size;
                progress.total_files = progress.total_files.max(progress.processed_files);
                progress.total_bytes = progress.total_bytes.max(progress.processed_bytes);
                progress.current_file = Some(entry.path.to_string());
                if let Some(cb) = &on_progress {
                    cb(&progress);
                }
            })?;
            progress.total_files = progress.processed_files;
            progress.total_bytes = progress.processed_bytes;
            Ok(progress)
        })
        .await
        .map_err(|e| XferError::io("archive decoder panicked", io::Error::other(e.to_string())))??;

        info!(
            remote,
            local = %local.display(),
            files = progress.processed_files,
            bytes = progress.processed_bytes,
            "Folder download complete"
        );
        Ok(progress)
    }

    /// Download `remote`, whichever it is: a directory is extracted into
    /// `local`, a file is written to `local` (or inside it, if `local` is an
    /// existing directory). The kind is looked up by listing the parent.
    pub async fn download(
        &self,
        remote: &str,
        local: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<TransferProgress> {
        let path = sanitize(remote)?;
        let Some(name) = path.file_name() else {
            return self.download_folder(remote, local, on_progress).await;
        };

        let entry = self
            .list(path.parent().as_str())
            .await?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| XferError::NotFound(path.to_string()))?;
        if entry.is_dir {
            return self.download_folder(path.as_str(), local, on_progress).await;
        }

        let target: PathBuf = if local.is_dir() {
            local.join(name)
        } else {
            local.to_path_buf()
        };
        let bytes = self.download_file(path.as_str(), &target).await?;
        let progress = TransferProgress {
            total_files: 1,
            processed_files: 1,
            total_bytes: bytes,
            processed_bytes: bytes,
            current_file: Some(path.to_string()),
        };
        if let Some(cb) = &on_progress {
            cb(&progress);
        }
        Ok(progress)
    }

    /// Map a non-2xx response to [`XferError::Remote`].
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await?;
        // Try to extract error message from JSON body
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(String::from))
            .unwrap_or(body);
        Err(XferError::Remote {
            status: status.as_u16(),
            message,
        })
    }

    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let resp = Self::check(resp).await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| XferError::Remote {
            status,
            message: format!("invalid JSON from server: {e}"),
        })
    }
}

fn is_archive(headers: &HeaderMap) -> bool {
    headers.contains_key("X-Transfer-ID")
        || headers
            .get(CONTENT_TYPE)
            .is_some_and(|v| v.as_bytes().starts_with(b"application/gzip"))
}

async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| XferError::io_at("create directory", parent, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(url: &str) -> XferClient {
        XferClient::new(ClientConfig {
            server_url: url.to_string(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(client("http://box:8080/").base_url(), "http://box:8080");
    }

    #[test]
    fn query_path_is_sanitized_and_encoded() {
        let c = client("http://box:8080");
        let url = c
            .endpoint_with_path("/api/download", &sanitize("docs/a b.txt").unwrap())
            .unwrap();
        assert_eq!(url.path(), "/api/download");
        assert_eq!(
            url.query_pairs().next().map(|(k, v)| (k.into_owned(), v.into_owned())),
            Some(("path".to_string(), "docs/a b.txt".to_string()))
        );
    }

    #[tokio::test]
    async fn bad_remote_paths_fail_before_any_request() {
        // Nothing listens on this port; a request would be a transport error.
        let c = client("http://127.0.0.1:9");
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("f.txt");
        std::fs::write(&local, b"x").unwrap();

        for remote in ["../x", "/etc/passwd", ""] {
            let err = c.upload_file(&local, remote).await.unwrap_err();
            assert!(
                matches!(err, XferError::InvalidPath { .. } | XferError::InvalidRequest(_)),
                "{remote}: {err}"
            );
        }
        assert_eq!(
            c.download_file("../../etc/passwd", &local).await.unwrap_err().code(),
            "INVALID_PATH"
        );
    }

    /// Serve `body` at `/api/download` with the given `X-File-Hash` value.
    async fn file_server(hash: String, body: &'static [u8]) -> XferClient {
        let app = axum::Router::new().route(
            "/api/download",
            axum::routing::get(move || {
                let hash = hash.clone();
                async move { ([("X-File-Hash", hash)], body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        client(&format!("http://{addr}"))
    }

    #[tokio::test]
    async fn download_file_verifies_digest() {
        let good = Hasher::default().digest_bytes(b"payload").to_string();
        let c = file_server(good, b"payload").await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("out/f.bin");
        assert_eq!(c.download_file("f.bin", &local).await.unwrap(), 7);
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn download_file_digest_mismatch_is_reported() {
        let wrong = Hasher::default().digest_bytes(b"something else").to_string();
        let c = file_server(wrong, b"payload").await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("f.bin");

        let err = c.download_file("f.bin", &local).await.unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(err.code(), "HASH_MISMATCH");
        // Left in place for inspection.
        assert_eq!(std::fs::read(&local).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn download_file_rejects_bad_hash_header() {
        let dir = tempfile::tempdir().unwrap();
        for (header, code) in [
            ("crc32:deadbeef", "HASH_ALGORITHM"),
            ("not-a-digest", "INVALID_REQUEST"),
            ("sha256:xyz", "INVALID_REQUEST"),
        ] {
            let c = file_server(header.to_string(), b"payload").await;
            let local = dir.path().join("f.bin");
            let err = c.download_file("f.bin", &local).await.unwrap_err();
            assert_eq!(err.code(), code, "{header}");
            assert!(!local.exists(), "{header}");
        }
    }

    #[test]
    fn root_is_sent_as_dot() {
        let c = client("http://box:8080");
        let url = c.endpoint_with_path("/api/download", &SafePath::root()).unwrap();
        assert_eq!(url.query(), Some("path=."));
    }

    #[test]
    fn archive_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_archive(&headers));
        headers.insert(CONTENT_TYPE, "application/gzip".parse().unwrap());
        assert!(is_archive(&headers));
    }
}
