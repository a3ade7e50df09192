//! Streaming directory archives (gzip-compressed tar).
//!
//! [`encode`] walks a directory once and writes each regular file as a tar
//! header followed by its payload, as it is discovered. [`decode`] reads the
//! stream one entry at a time and materializes each file before reading the
//! next header. Neither side holds more than one copy buffer in memory.
//!
//! Entry names are re-sanitized on decode: an archive is wire input.

use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::UNIX_EPOCH;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType, Header};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::sanitize::{sanitize, sanitize_relative, SafePath};
use crate::error::{Result, XferError};

/// Metadata of one archived file, reported after it is fully encoded or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: SafePath,
    pub size: u64,
    /// Permission bits (`0o7777` mask).
    pub mode: u32,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: u64,
}

/// Totals produced by [`encode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: u64,
    pub bytes: u64,
}

/// Archive every regular file under `root` into `out` as tar.gz.
///
/// Directories are not emitted as entries; they are implied by file paths.
/// Symlinks and special files are skipped. Walk order is lexicographic.
///
/// On error the output is cut off where it stands: neither the tar
/// end-of-archive blocks nor the gzip trailer are written, so a reader of
/// the partial stream fails instead of seeing a shorter, valid archive.
pub fn encode<W: Write>(
    root: &Path,
    out: W,
    mut on_entry: impl FnMut(&ArchiveEntry),
) -> Result<ArchiveSummary> {
    let aborted = Rc::new(Cell::new(false));
    let sink = AbortableWriter {
        inner: out,
        aborted: Rc::clone(&aborted),
    };
    let mut builder = Builder::new(GzEncoder::new(sink, Compression::default()));

    let summary = match append_tree(root, &mut builder, &mut on_entry) {
        Ok(summary) => summary,
        Err(e) => {
            // Builder and GzEncoder write their trailers on drop.
            aborted.set(true);
            return Err(e);
        }
    };

    let gz = builder
        .into_inner()
        .map_err(|e| XferError::io("failed to finish archive", e))?;
    let mut out = gz
        .finish()
        .map_err(|e| XferError::io("failed to finish compression", e))?;
    out.flush()
        .map_err(|e| XferError::io("failed to flush archive", e))?;
    Ok(summary)
}

fn append_tree<W: Write>(
    root: &Path,
    builder: &mut Builder<W>,
    on_entry: &mut impl FnMut(&ArchiveEntry),
) -> Result<ArchiveSummary> {
    let mut summary = ArchiveSummary::default();

    for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let item = item.map_err(|e| XferError::io(format!("failed to walk {}", root.display()), e.into()))?;
        if !item.file_type().is_file() {
            continue;
        }
        let path = item.path();
        let rel = sanitize_relative(root, path)?;
        let meta = item
            .metadata()
            .map_err(|e| XferError::io(format!("failed to stat {}", path.display()), e.into()))?;

        let entry = ArchiveEntry {
            path: rel,
            size: meta.len(),
            mode: permission_bits(&meta),
            mtime: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_secs()),
        };

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(entry.size);
        header.set_mode(entry.mode);
        header.set_mtime(entry.mtime);

        let file = File::open(path).map_err(|e| XferError::io_at("open", path, e))?;
        builder
            .append_data(&mut header, entry.path.as_str(), ExactReader::new(file, entry.size))
            .map_err(|e| XferError::io(format!("failed to archive {}", entry.path), e))?;

        summary.files += 1;
        summary.bytes += entry.size;
        debug!(path = %entry.path, size = entry.size, "Archived");
        on_entry(&entry);
    }
    Ok(summary)
}

/// Passes writes through until `aborted` is set, then refuses them all.
struct AbortableWriter<W> {
    inner: W,
    aborted: Rc<Cell<bool>>,
}

impl<W: Write> Write for AbortableWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.aborted.get() {
            return Err(io::Error::other("archive aborted"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.aborted.get() {
            return Err(io::Error::other("archive aborted"));
        }
        self.inner.flush()
    }
}

/// Count the files and bytes [`encode`] would emit for `root`, without reading payloads.
pub fn measure(root: &Path) -> Result<ArchiveSummary> {
    let mut summary = ArchiveSummary::default();
    for item in WalkDir::new(root).follow_links(false) {
        let item = item.map_err(|e| XferError::io(format!("failed to walk {}", root.display()), e.into()))?;
        if !item.file_type().is_file() {
            continue;
        }
        let meta = item.metadata().map_err(|e| {
            XferError::io(format!("failed to stat {}", item.path().display()), e.into())
        })?;
        summary.files += 1;
        summary.bytes += meta.len();
    }
    Ok(summary)
}

/// Extract a tar.gz stream into `dest`, returning the number of files written.
///
/// Any header or payload error aborts with that error, as does a stream that
/// ends before its gzip trailer; files already written stay on disk.
/// Permission and mtime restoration failures only log a warning.
pub fn decode<R: Read>(
    input: R,
    dest: &Path,
    mut on_entry: impl FnMut(&ArchiveEntry),
) -> Result<usize> {
    let mut archive = Archive::new(GzDecoder::new(input));
    let entries = archive
        .entries()
        .map_err(|e| XferError::io("failed to read archive", e))?;

    let mut written = 0usize;
    for entry in entries {
        let mut entry = entry.map_err(|e| XferError::io("failed to read archive header", e))?;

        let raw_name = entry
            .path()
            .map_err(|e| XferError::io("invalid archive entry name", e))?
            .to_string_lossy()
            .into_owned();
        if !entry.header().entry_type().is_file() {
            debug!(name = %raw_name, "Skipping non-file archive entry");
            continue;
        }
        let rel = sanitize(&raw_name)?;
        if rel.is_root() {
            return Err(XferError::invalid_path(&raw_name, "archive entry has no file name"));
        }

        let size = entry.size();
        let mode = entry.header().mode().ok();
        let mtime = entry.header().mtime().ok();
        let target = rel.resolve(dest);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| XferError::io_at("create directory", parent, e))?;
        }
        let mut file = File::create(&target).map_err(|e| XferError::io_at("create", &target, e))?;
        let copied = io::copy(&mut entry, &mut file)
            .map_err(|e| XferError::io(format!("failed to write {}", target.display()), e))?;
        drop(file);

        if copied != size {
            return Err(XferError::io(
                format!("failed to write {}", target.display()),
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("payload is {copied} bytes, header declares {size}"),
                ),
            ));
        }

        if let Some(mode) = mode {
            if let Err(e) = set_permission_bits(&target, mode) {
                warn!(path = %target.display(), "Failed to set permissions: {e}");
            }
        }
        if let Some(mtime) = mtime {
            #[allow(clippy::cast_possible_wrap)]
            let ft = filetime::FileTime::from_unix_time(mtime as i64, 0);
            if let Err(e) = filetime::set_file_mtime(&target, ft) {
                warn!(path = %target.display(), "Failed to set modification time: {e}");
            }
        }

        written += 1;
        debug!(path = %rel, size, "Extracted");
        on_entry(&ArchiveEntry {
            path: rel,
            size,
            mode: mode.unwrap_or(0),
            mtime: mtime.unwrap_or(0),
        });
    }

    // Read through the gzip trailer: a stream cut short after a complete
    // entry must not pass for a finished archive.
    let mut rest = archive.into_inner();
    io::copy(&mut rest, &mut io::sink())
        .map_err(|e| XferError::io("archive stream ended early", e))?;
    Ok(written)
}

/// Reads exactly `size` bytes from the inner reader, failing if it ends early.
///
/// Keeps the tar stream well-formed when a file shrinks after it was stat'ed.
struct ExactReader<R> {
    inner: io::Take<R>,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner: inner.take(size),
            remaining: size,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && self.remaining > 0 && !buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank while archiving ({} bytes missing)", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
fn set_permission_bits(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
fn set_permission_bits(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn write(root: &Path, rel: &str, data: &[u8]) -> PathBuf {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(&p, data).unwrap();
        p
    }

    fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = sanitize_relative(root, e.path()).unwrap();
                (rel.as_str().to_string(), fs::read(e.path()).unwrap())
            })
            .collect()
    }

    #[test]
    fn measure_agrees_with_encode() {
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "a.txt", b"abc");
        write(src.path(), "nested/deeper/b.txt", b"defgh");
        let measured = measure(src.path()).unwrap();
        let encoded = encode(src.path(), io::sink(), |_| {}).unwrap();
        assert_eq!(measured, encoded);
        assert_eq!(measured, ArchiveSummary { files: 2, bytes: 8 });
    }

    #[test]
    fn round_trip_preserves_paths_and_bytes() {
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "docs/readme.txt", b"hello world");
        write(src.path(), "docs/sub/img.bin", &[0, 1, 2, 3]);
        write(src.path(), "empty.txt", b"");
        fs::create_dir_all(src.path().join("no_files_here")).unwrap();

        let mut buf = Vec::new();
        let mut seen = Vec::new();
        let summary = encode(src.path(), &mut buf, |e| seen.push(e.path.to_string())).unwrap();
        assert_eq!(summary, ArchiveSummary { files: 3, bytes: 15 });
        assert_eq!(seen, ["docs/readme.txt", "docs/sub/img.bin", "empty.txt"]);

        let dst = tempfile::tempdir().unwrap();
        let count = decode(&buf[..], dst.path(), |_| {}).unwrap();
        assert_eq!(count, 3);
        assert_eq!(snapshot(src.path()), snapshot(dst.path()));
        assert!(!dst.path().join("no_files_here").exists());
    }

    #[cfg(unix)]
    #[test]
    fn round_trip_restores_mode_and_mtime() {
        use std::os::unix::fs::PermissionsExt;

        let src = tempfile::tempdir().unwrap();
        let p = write(src.path(), "bin/run.sh", b"#!/bin/sh\n");
        fs::set_permissions(&p, fs::Permissions::from_mode(0o750)).unwrap();
        filetime::set_file_mtime(&p, filetime::FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let mut buf = Vec::new();
        encode(src.path(), &mut buf, |_| {}).unwrap();
        let dst = tempfile::tempdir().unwrap();
        decode(&buf[..], dst.path(), |_| {}).unwrap();

        let meta = fs::metadata(dst.path().join("bin/run.sh")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o7777, 0o750);
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
    }

    fn raw_archive(name: &str, data: &[u8]) -> Vec<u8> {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        // Write the name bytes directly so `..` is not rejected by the builder.
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();
        builder.append(&header, data).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn decode_rejects_traversal_entry() {
        let dst = tempfile::tempdir().unwrap();
        let archive = raw_archive("../escape.txt", b"evil");
        let err = decode(&archive[..], dst.path(), |_| {}).unwrap_err();
        assert_eq!(err.code(), "INVALID_PATH");
        assert!(!dst.path().parent().unwrap().join("escape.txt").exists());
    }

    #[test]
    fn truncated_stream_keeps_completed_files() {
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "a.txt", b"first file");
        let big: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        write(src.path(), "b.bin", &big);

        let mut buf = Vec::new();
        encode(src.path(), &mut buf, |_| {}).unwrap();
        buf.truncate(buf.len() * 3 / 4);

        let dst = tempfile::tempdir().unwrap();
        assert!(decode(&buf[..], dst.path(), |_| {}).is_err());
        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"first file");
    }

    #[test]
    fn exact_reader_detects_shrinking_source() {
        let mut r = ExactReader::new(&b"abc"[..], 5);
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn failed_encode_output_does_not_decode() {
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "a.txt", b"first");
        let doomed = write(src.path(), "b.txt", b"second");
        write(src.path(), "c.txt", b"third");

        // b.txt vanishes after the walk listed it but before it is archived.
        let mut buf = Vec::new();
        let err = encode(src.path(), &mut buf, |e| {
            if e.path.as_str() == "a.txt" {
                fs::remove_file(&doomed).unwrap();
            }
        })
        .unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");

        let dst = tempfile::tempdir().unwrap();
        assert!(decode(&buf[..], dst.path(), |_| {}).is_err());
        assert!(!dst.path().join("c.txt").exists());
    }

    #[test]
    fn missing_gzip_trailer_is_an_error() {
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "a.txt", b"complete entry");
        let mut buf = Vec::new();
        encode(src.path(), &mut buf, |_| {}).unwrap();
        buf.truncate(buf.len() - 4);

        let dst = tempfile::tempdir().unwrap();
        let err = decode(&buf[..], dst.path(), |_| {}).unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
        assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), b"complete entry");
    }

    #[test]
    fn empty_directory_encodes_to_empty_archive() {
        let src = tempfile::tempdir().unwrap();
        let mut buf = Vec::new();
        let summary = encode(src.path(), &mut buf, |_| {}).unwrap();
        assert_eq!(summary.files, 0);
        let dst = tempfile::tempdir().unwrap();
        assert_eq!(decode(&buf[..], dst.path(), |_| {}).unwrap(), 0);
    }
}
