//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `DIRXFER_LISTEN`, `DIRXFER_STORAGE`,
//!    `DIRXFER_SERVER`
//! 2. **Config file**: path via `--config <path>`, or `dirxfer.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! Server and client share one file; each binary reads its own section.
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! storage_path = "./uploads"
//! max_upload_size = 104857600  # 100 MB
//! hash_algorithm = "sha256"
//! status_ttl_secs = 3600       # 0 = keep finished statuses forever
//! max_statuses = 1000          # 0 = no cap
//! sweep_interval_secs = 60
//!
//! [client]
//! server_url = "http://localhost:8080"
//! timeout_secs = 300
//! concurrency = 4
//! hash_algorithm = "sha256"
//! wait_for_server = false
//! poll_interval_ms = 200
//!
//! [logging]
//! level = "info"
//! format = "text"   # or "json"
//! sink = "stderr"   # "stdout", or a file path
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XferError};
use crate::xfer::registry::RegistryConfig;
use crate::xfer::types::HashAlgorithm;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "dirxfer.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server, storage, and status-retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8080`). Override with `DIRXFER_LISTEN`.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Root directory for stored files (default `./uploads`). Override with `DIRXFER_STORAGE`.
    #[serde(default = "default_storage_path")]
    pub storage_path: String,
    /// Maximum request body size in bytes for `/api/upload` (default 100 MB).
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
    /// Digest algorithm for `X-File-Hash` and upload verification.
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    /// Seconds a finished status stays queryable (default 3600, 0 = forever).
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,
    /// Cap on retained statuses (default 1000, 0 = unbounded).
    #[serde(default = "default_max_statuses")]
    pub max_statuses: usize,
    /// Seconds between status sweeps (default 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Client connection and transfer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the server (default `http://localhost:8080`). Override with `DIRXFER_SERVER`.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Per-request timeout in seconds (default 300).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Files transferred in parallel by folder uploads (default 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Digest algorithm used for uploads.
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    /// Poll `/api/status/{id}` after each upload until it finishes (default false).
    #[serde(default)]
    pub wait_for_server: bool,
    /// Delay between status polls in milliseconds (default 200).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// `stderr` (default), `stdout`, or a file path to append to.
    #[serde(default = "default_log_sink")]
    pub sink: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_storage_path() -> String {
    "./uploads".to_string()
}
fn default_max_upload_size() -> usize {
    100 * 1024 * 1024 // 100 MB
}
fn default_status_ttl_secs() -> u64 {
    3600
}
fn default_max_statuses() -> usize {
    1000
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_concurrency() -> usize {
    4
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_sink() -> String {
    "stderr".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            storage_path: default_storage_path(),
            max_upload_size: default_max_upload_size(),
            hash_algorithm: HashAlgorithm::default(),
            status_ttl_secs: default_status_ttl_secs(),
            max_statuses: default_max_statuses(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            timeout_secs: default_timeout_secs(),
            concurrency: default_concurrency(),
            hash_algorithm: HashAlgorithm::default(),
            wait_for_server: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            sink: default_log_sink(),
        }
    }
}

impl ServerConfig {
    /// Eviction limits for the status registry; zero disables a limit.
    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            status_ttl: (self.status_ttl_secs > 0).then(|| Duration::from_secs(self.status_ttl_secs)),
            max_statuses: (self.max_statuses > 0).then_some(self.max_statuses),
        }
    }

    /// Sweep period, never shorter than one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `dirxfer.toml` in
    /// the current directory is used when present, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file without applying env overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            XferError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| XferError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Apply env var overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(listen) = lookup("DIRXFER_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(storage) = lookup("DIRXFER_STORAGE") {
            self.server.storage_path = storage;
        }
        if let Some(server) = lookup("DIRXFER_SERVER") {
            self.client.server_url = server;
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| XferError::Config(format!("failed to serialize config: {e}")))
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| XferError::io_at("create", parent, e))?;
        }
        std::fs::write(path, self.to_toml()?).map_err(|e| XferError::io_at("write", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.max_upload_size, 100 * 1024 * 1024);
        assert_eq!(config.client.concurrency, 4);
        assert_eq!(config.client.timeout_secs, 300);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.server.hash_algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            storage_path = "/srv/data"
            hash_algorithm = "md5"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.storage_path, "/srv/data");
        assert_eq!(config.server.hash_algorithm, HashAlgorithm::Md5);
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn env_overrides_win() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "DIRXFER_LISTEN" => Some("127.0.0.1:9000".into()),
            "DIRXFER_SERVER" => Some("http://box:9000".into()),
            _ => None,
        });
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.client.server_url, "http://box:9000");
        assert_eq!(config.server.storage_path, "./uploads");
    }

    #[test]
    fn zero_disables_registry_limits() {
        let mut server = ServerConfig::default();
        let limits = server.registry();
        assert_eq!(limits.status_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(limits.max_statuses, Some(1000));

        server.status_ttl_secs = 0;
        server.max_statuses = 0;
        let limits = server.registry();
        assert!(limits.status_ttl.is_none());
        assert!(limits.max_statuses.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dirxfer.toml");
        let mut config = Config::default();
        config.client.concurrency = 9;
        config.client.wait_for_server = true;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.client.concurrency, 9);
        assert!(loaded.client.wait_for_server);
    }

    #[test]
    fn bad_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[server\nlisten = ").unwrap();
        assert_eq!(Config::from_file(&path).unwrap_err().code(), "CONFIG");
        assert_eq!(
            Config::from_file(&dir.path().join("absent.toml")).unwrap_err().code(),
            "CONFIG"
        );
    }
}
