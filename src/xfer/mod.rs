//! Transfer core: digests, path sanitizing, the tar.gz codec, and the
//! server-side status registry.
//!
//! A self-contained module: nothing here knows about HTTP. The server routes
//! and the client adapt these pieces to their transport.

pub mod archive;
pub mod hasher;
pub mod registry;
pub mod sanitize;
pub mod types;

pub use archive::{decode, encode, measure, ArchiveEntry, ArchiveSummary};
pub use hasher::Hasher;
pub use registry::{RegistryConfig, StatusRegistry, TransferHandle};
pub use sanitize::{sanitize, SafePath};
pub use types::{
    Direction, FileHash, HashAlgorithm, ListEntry, TransferState, TransferStatus, UploadReceipt,
};
