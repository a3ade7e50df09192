//! Relative path validation.
//!
//! Every path that crosses the wire (multipart fields, query parameters,
//! archive entry names) goes through [`sanitize`] before it touches the
//! filesystem. The result is a [`SafePath`]: `/`-separated, no empty, `.`,
//! or `..` segments, never absolute.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, XferError};

/// A normalized relative path that cannot escape the root it is resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SafePath(String);

impl SafePath {
    /// The root itself (sanitized `""` or `"."`).
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Parent path; the root's parent is the root.
    pub fn parent(&self) -> SafePath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => SafePath(parent.to_string()),
            None => SafePath::root(),
        }
    }

    /// Append an untrusted relative path, re-validating the result.
    pub fn join(&self, rest: &str) -> Result<SafePath> {
        let tail = sanitize(rest)?;
        Ok(match (self.is_root(), tail.is_root()) {
            (true, _) => tail,
            (false, true) => self.clone(),
            (false, false) => SafePath(format!("{}/{}", self.0, tail.0)),
        })
    }

    /// Resolve against a filesystem root.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        self.0
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(root.to_path_buf(), |acc, seg| acc.join(seg))
    }
}

impl fmt::Display for SafePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Normalize `raw` and reject anything that could leave the root.
///
/// - `\` counts as a separator.
/// - empty and `.` segments are dropped; `..` removes the previous segment.
/// - a `..` with nothing left to remove, an absolute path, a drive prefix, or a
///   NUL byte is an [`XferError::InvalidPath`].
pub fn sanitize(raw: &str) -> Result<SafePath> {
    if raw.contains('\0') {
        return Err(XferError::invalid_path(raw, "contains null bytes"));
    }
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(XferError::invalid_path(raw, "must be relative"));
    }
    if has_drive_prefix(&unified) {
        return Err(XferError::invalid_path(raw, "must not carry a drive prefix"));
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in unified.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(XferError::invalid_path(raw, "escapes the root"));
                }
            }
            s => segments.push(s),
        }
    }
    Ok(SafePath(segments.join("/")))
}

/// Sanitize a path taken relative to a local directory (e.g. from a walk).
pub fn sanitize_relative(base: &Path, path: &Path) -> Result<SafePath> {
    let rel = path.strip_prefix(base).map_err(|_| {
        XferError::invalid_path(&path.display().to_string(), "not under the source root")
    })?;
    let joined = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    sanitize(&joined)
}

fn has_drive_prefix(p: &str) -> bool {
    let bytes = p.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
