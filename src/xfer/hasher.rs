//! Streaming content digests.
//!
//! All functions stream data in 64 KiB blocks and never load a full file into memory.
//! The algorithm is chosen at runtime from the closed [`HashAlgorithm`] set.

use std::io::{self, Read};
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::types::{FileHash, HashAlgorithm};
use crate::error::{Result, XferError};

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// Running digest state for one of the supported algorithms.
enum DigestState {
    Md5(Md5),
    Sha256(Sha256),
}

impl DigestState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => DigestState::Md5(Md5::new()),
            HashAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            DigestState::Md5(h) => h.update(data),
            DigestState::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Md5(h) => hex::encode(h.finalize()),
            DigestState::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes and verifies digests with one configured algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hasher {
    algorithm: HashAlgorithm,
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Digest a byte slice.
    pub fn digest_bytes(&self, data: &[u8]) -> FileHash {
        let mut state = DigestState::new(self.algorithm);
        state.update(data);
        FileHash::new(self.algorithm, state.finalize_hex())
    }

    /// Digest everything `reader` yields. Consumes the reader.
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> io::Result<FileHash> {
        let mut state = DigestState::new(self.algorithm);
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            state.update(&buf[..n]);
        }
        Ok(FileHash::new(self.algorithm, state.finalize_hex()))
    }

    /// Async counterpart of [`Hasher::digest_reader`].
    pub async fn digest_async<R: AsyncRead + Unpin>(&self, mut reader: R) -> io::Result<FileHash> {
        let mut state = DigestState::new(self.algorithm);
        let mut buf = vec![0u8; BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            state.update(&buf[..n]);
        }
        Ok(FileHash::new(self.algorithm, state.finalize_hex()))
    }

    /// Digest a whole file by streaming it.
    pub async fn digest_file(&self, path: &Path) -> Result<FileHash> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| XferError::io_at("open", path, e))?;
        self.digest_async(file)
            .await
            .map_err(|e| XferError::io_at("hash", path, e))
    }

    /// Verify `reader` against `expected`.
    ///
    /// Fails with [`XferError::AlgorithmMismatch`] before touching the reader
    /// if `expected` was made with another algorithm.
    pub fn verify_reader<R: Read>(&self, reader: R, expected: &FileHash) -> Result<bool> {
        self.ensure_algorithm(expected)?;
        let actual = self
            .digest_reader(reader)
            .map_err(|e| XferError::io("failed to calculate hash", e))?;
        Ok(actual.value == expected.value)
    }

    /// Async counterpart of [`Hasher::verify_reader`].
    pub async fn verify_async<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        expected: &FileHash,
    ) -> Result<bool> {
        self.ensure_algorithm(expected)?;
        let actual = self
            .digest_async(reader)
            .await
            .map_err(|e| XferError::io("failed to calculate hash", e))?;
        Ok(actual.value == expected.value)
    }

    /// Verify a file on disk against `expected`.
    pub async fn verify_file(&self, path: &Path, expected: &FileHash) -> Result<bool> {
        self.ensure_algorithm(expected)?;
        let actual = self.digest_file(path).await?;
        Ok(actual.value == expected.value)
    }

    fn ensure_algorithm(&self, expected: &FileHash) -> Result<()> {
        if expected.algorithm == self.algorithm {
            Ok(())
        } else {
            Err(XferError::AlgorithmMismatch {
                expected: expected.algorithm,
                actual: self.algorithm,
            })
        }
    }
}

/// Lowercase hex encoding of digest output.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(
            String::with_capacity(bytes.as_ref().len() * 2),
            |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{b:02x}");
                s
            },
        )
    }
}
