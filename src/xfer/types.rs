//! Data types shared by the transfer core, the HTTP routes, and the client.
//!
//! All wire types are plain serde structs. The module knows nothing about
//! HTTP or axum. Integration layers adapt these types to their transport.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::XferError;

/// Transfer direction from the server's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// Transfer lifecycle state. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferState {
    Running,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferState::Running => "running",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }
}

/// Server-side status record for one transfer, returned by `GET /api/status/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub direction: Direction,
    pub status: TransferState,
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    pub total_files: u64,
    pub processed_files: u64,
    pub total_size: u64,
    pub processed_size: u64,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferStatus {
    pub fn new(id: String, direction: Direction) -> Self {
        Self {
            id,
            direction,
            status: TransferState::Running,
            progress: 0.0,
            total_files: 0,
            processed_files: 0,
            total_size: 0,
            processed_size: 0,
            start_time: Utc::now(),
            end_time: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Set the denominators. Ignored once terminal.
    pub fn set_totals(&mut self, files: u64, bytes: u64) {
        if self.is_terminal() {
            return;
        }
        self.total_files = files;
        self.total_size = bytes;
        self.recompute_progress();
    }

    /// Count one more finished file of `bytes` length. Ignored once terminal.
    pub fn record_file(&mut self, bytes: u64) {
        if self.is_terminal() {
            return;
        }
        self.processed_files += 1;
        self.processed_size += bytes;
        self.recompute_progress();
    }

    /// `running → completed`. No-op if already terminal.
    pub fn complete(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = TransferState::Completed;
        self.progress = 1.0;
        self.end_time = Some(Utc::now());
    }

    /// `running → failed`. No-op if already terminal, so the first error sticks.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.status = TransferState::Failed;
        self.error = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute_progress(&mut self) {
        let ratio = if self.total_files > 0 {
            self.processed_files as f64 / self.total_files as f64
        } else if self.total_size > 0 {
            self.processed_size as f64 / self.total_size as f64
        } else {
            0.0
        };
        self.progress = ratio.clamp(0.0, 1.0);
    }
}

/// Supported digest algorithms.
///
/// A closed set: adding a variant forces every `match` on it to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Fast, not collision resistant.
    Md5,
    #[default]
    Sha256,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 2] = [HashAlgorithm::Md5, HashAlgorithm::Sha256];

    pub fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = XferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| XferError::UnsupportedAlgorithm(s.to_string()))
    }
}

/// Digest of some content: algorithm plus lowercase hex value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHash {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl FileHash {
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            value: value.into().to_ascii_lowercase(),
        }
    }

    /// Compare against a freshly computed digest, distinguishing algorithm
    /// mismatch from value mismatch.
    pub fn check(&self, actual: &FileHash) -> Result<(), XferError> {
        if self.algorithm != actual.algorithm {
            return Err(XferError::AlgorithmMismatch {
                expected: self.algorithm,
                actual: actual.algorithm,
            });
        }
        if self.value != actual.value {
            return Err(XferError::DigestMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

/// Wire form `algorithm:hexdigest`, as carried by `X-File-Hash`.
impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl FromStr for FileHash {
    type Err = XferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (alg, value) = s
            .split_once(':')
            .ok_or_else(|| XferError::InvalidRequest(format!("invalid hash format: {s}")))?;
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(XferError::InvalidRequest(format!(
                "invalid hash digest: {s}"
            )));
        }
        Ok(FileHash::new(alg.parse()?, value))
    }
}

/// One row of `GET /api/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

/// Response body of `POST /api/upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub transfer_id: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminal_state_is_sticky() {
        let mut st = TransferStatus::new("t1".into(), Direction::Upload);
        st.set_totals(2, 10);
        st.record_file(5);
        st.fail("disk full");
        st.complete();
        st.fail("second error");
        st.record_file(5);
        assert_eq!(st.status, TransferState::Failed);
        assert_eq!(st.error.as_deref(), Some("disk full"));
        assert_eq!(st.processed_files, 1);
        assert!(st.end_time.is_some());
    }

    #[test]
    fn status_progress_is_clamped() {
        let mut st = TransferStatus::new("t2".into(), Direction::Upload);
        st.set_totals(1, 4);
        st.record_file(4);
        st.record_file(4);
        assert!((st.progress - 1.0).abs() < f64::EPSILON);
        st.complete();
        assert_eq!(st.status, TransferState::Completed);
        assert!(st.error.is_none());
    }

    #[test]
    fn status_serializes_wire_field_names() {
        let st = TransferStatus::new("transfer_1".into(), Direction::Download);
        let json = serde_json::to_value(&st).unwrap();
        assert_eq!(json["type"], "download");
        assert_eq!(json["status"], "running");
        assert!(json.get("end_time").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn file_hash_parses_wire_form() {
        let h: FileHash = "SHA256:ABCDEF01".parse().unwrap();
        assert_eq!(h.algorithm, HashAlgorithm::Sha256);
        assert_eq!(h.value, "abcdef01");
        assert_eq!(h.to_string(), "sha256:abcdef01");
    }

    #[test]
    fn file_hash_rejects_bad_input() {
        assert!(matches!(
            "crc32:00ff".parse::<FileHash>(),
            Err(XferError::UnsupportedAlgorithm(_))
        ));
        assert!("sha256".parse::<FileHash>().is_err());
        assert!("md5:xyz".parse::<FileHash>().is_err());
    }

    #[test]
    fn file_hash_check_distinguishes_mismatches() {
        let expected = FileHash::new(HashAlgorithm::Md5, "00");
        let other_alg = FileHash::new(HashAlgorithm::Sha256, "00");
        let other_val = FileHash::new(HashAlgorithm::Md5, "01");
        assert!(matches!(
            expected.check(&other_alg),
            Err(XferError::AlgorithmMismatch { .. })
        ));
        assert!(matches!(
            expected.check(&other_val),
            Err(XferError::DigestMismatch { .. })
        ));
        assert!(expected.check(&expected.clone()).is_ok());
    }
}
