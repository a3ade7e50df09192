//! Error type shared by the server, the client, and the transfer core.
//!
//! Every variant maps to a stable machine-readable `code()` that is also the
//! `code` field of HTTP error bodies, so both sides of the wire agree on the
//! taxonomy.

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::xfer::types::HashAlgorithm;

/// Crate-wide result alias.
pub type Result<T, E = XferError> = std::result::Result<T, E>;

/// Main error type for dirxfer operations.
#[derive(Debug, Error)]
pub enum XferError {
    /// Path contains traversal, is absolute, or is otherwise malformed.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Request is structurally wrong (missing field, bad header, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Remote or local path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// No status record for the given transfer id.
    #[error("transfer not found: {0}")]
    TransferNotFound(String),

    /// Read, write, or stat failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Expected digest was produced by a different algorithm than the verifier's.
    #[error("hash algorithm mismatch: expected {expected}, verifier uses {actual}")]
    AlgorithmMismatch {
        expected: HashAlgorithm,
        actual: HashAlgorithm,
    },

    /// Content digest differs from the expected one.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Unknown algorithm tag in a `algorithm:hex` string.
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Source directory holds no regular files.
    #[error("no files found in directory: {0}")]
    EmptyDirectory(String),

    /// HTTP transport error (connection refused, timeout, DNS failure, ...).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status or reported a failed transfer.
    #[error("server error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },

    /// Configuration could not be read, parsed, or written.
    #[error("configuration error: {0}")]
    Config(String),
}

impl XferError {
    /// Wrap an I/O error with a short description of what was being done.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an I/O error on a specific path, mapping `NotFound` to [`XferError::NotFound`].
    pub fn io_at(action: &str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound(path.display().to_string());
        }
        Self::io(format!("failed to {action} {}", path.display()), source)
    }

    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason,
        }
    }

    /// Stable code used in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::NotFound(_) => "FILE_NOT_FOUND",
            Self::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            Self::Io { .. } => "IO_ERROR",
            Self::AlgorithmMismatch { .. } | Self::UnsupportedAlgorithm(_) => "HASH_ALGORITHM",
            Self::DigestMismatch { .. } => "HASH_MISMATCH",
            Self::EmptyDirectory(_) => "EMPTY_DIRECTORY",
            Self::Http(_) => "TRANSPORT",
            Self::Remote { .. } => "REMOTE",
            Self::Config(_) => "CONFIG",
        }
    }

    /// Returns `true` for digest or algorithm mismatches.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::AlgorithmMismatch { .. } | Self::DigestMismatch { .. }
        )
    }

    /// Returns `true` for missing paths, missing transfers, and remote 404s.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::TransferNotFound(_) | Self::Remote { status: 404, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_at_maps_not_found() {
        let err = XferError::io_at(
            "open",
            Path::new("/nope"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());
        assert_eq!(err.code(), "FILE_NOT_FOUND");
    }

    #[test]
    fn io_at_keeps_other_kinds() {
        let err = XferError::io_at(
            "write",
            Path::new("/x"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert_eq!(err.code(), "IO_ERROR");
        assert!(err.to_string().starts_with("failed to write /x"));
    }

    #[test]
    fn integrity_codes_are_distinct() {
        let alg = XferError::AlgorithmMismatch {
            expected: HashAlgorithm::Md5,
            actual: HashAlgorithm::Sha256,
        };
        let dig = XferError::DigestMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(alg.is_integrity() && dig.is_integrity());
        assert_ne!(alg.code(), dig.code());
    }
}
