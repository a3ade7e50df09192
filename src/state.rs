//! Shared application state passed to every handler via Axum's `State` extractor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::xfer::hasher::Hasher;
use crate::xfer::registry::StatusRegistry;

/// Shared application state for the dirxfer server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable server configuration loaded at startup.
    pub config: Arc<ServerConfig>,
    /// Root directory every request path is resolved against.
    pub storage: Arc<PathBuf>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Status of uploads and directory downloads, polled via `/api/status/{id}`.
    pub registry: Arc<StatusRegistry>,
    /// Digest algorithm for `X-File-Hash`.
    pub hasher: Hasher,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = StatusRegistry::new(config.registry());
        Self {
            storage: Arc::new(PathBuf::from(&config.storage_path)),
            hasher: Hasher::new(config.hash_algorithm),
            registry: Arc::new(registry),
            start_time: Instant::now(),
            config: Arc::new(config),
        }
    }

    pub fn storage(&self) -> &Path {
        &self.storage
    }
}
