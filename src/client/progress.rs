//! Client-side progress snapshots.

use std::sync::Arc;

/// Aggregate progress of one folder transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub total_files: u64,
    pub processed_files: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    /// Relative path of the most recently finished file.
    pub current_file: Option<String>,
}

impl TransferProgress {
    /// Completed fraction in `[0, 1]`: bytes when known, otherwise files.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        let ratio = if self.total_bytes > 0 {
            self.processed_bytes as f64 / self.total_bytes as f64
        } else if self.total_files > 0 {
            self.processed_files as f64 / self.total_files as f64
        } else {
            0.0
        };
        ratio.clamp(0.0, 1.0)
    }

    pub fn is_done(&self) -> bool {
        self.total_files > 0 && self.processed_files >= self.total_files
    }
}

/// Observer invoked after every progress change.
///
/// Called while the progress lock is held: keep it short and never call back
/// into the transfer from it.
pub type ProgressCallback = Arc<dyn Fn(&TransferProgress) + Send + Sync>;
