//! Bounded-concurrency fan-out of per-file operations.
//!
//! [`Dispatcher::run`] spawns one task per file but lets at most `K` of them
//! run their operation at a time, gated by a semaphore. Progress and the
//! first error share one mutex; the progress callback runs inside it, so
//! observers see updates in order.
//!
//! A failing file does not cancel its siblings: every file is attempted and
//! the first error is returned after all tasks have finished.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::progress::{ProgressCallback, TransferProgress};
use crate::error::{Result, XferError};
use crate::xfer::sanitize::{sanitize_relative, SafePath};

/// One unit of work handed to the per-file operation.
#[derive(Debug, Clone)]
pub struct FileJob {
    /// File on the local filesystem.
    pub local: PathBuf,
    /// Path relative to the source root, sanitized.
    pub relative: SafePath,
    /// Size when the job was planned; 0 if the file could not be stat'ed.
    pub size: u64,
}

/// All regular files under `root`, in sorted walk order.
///
/// Fails with [`XferError::EmptyDirectory`] when there are none.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(root).map_err(|e| XferError::io_at("stat", root, e))?;
    if !meta.is_dir() {
        return Err(XferError::InvalidRequest(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for item in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let item = item.map_err(|e| XferError::io(format!("failed to walk {}", root.display()), e.into()))?;
        if item.file_type().is_file() {
            files.push(item.into_path());
        }
    }
    if files.is_empty() {
        return Err(XferError::EmptyDirectory(root.display().to_string()));
    }
    Ok(files)
}

#[derive(Default)]
struct Shared {
    progress: TransferProgress,
    first_error: Option<XferError>,
}

/// Runs a per-file operation over many files with at most `K` in flight.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    concurrency: usize,
}

impl Dispatcher {
    /// `concurrency` is clamped to at least 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Apply `op` to every file in `files` (paths under `root`).
    ///
    /// Returns the final progress, or the first error any file produced.
    pub async fn run<F, Fut>(
        &self,
        root: &Path,
        files: Vec<PathBuf>,
        op: F,
        on_progress: Option<ProgressCallback>,
    ) -> Result<TransferProgress>
    where
        F: Fn(FileJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if files.is_empty() {
            return Err(XferError::EmptyDirectory(root.display().to_string()));
        }

        let mut jobs = Vec::with_capacity(files.len());
        let mut total_bytes = 0u64;
        for local in files {
            let relative = sanitize_relative(root, &local)?;
            let size = match tokio::fs::metadata(&local).await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(path = %local.display(), "Failed to stat, size unknown: {e}");
                    0
                }
            };
            total_bytes += size;
            jobs.push(FileJob {
                local,
                relative,
                size,
            });
        }

        let shared = Arc::new(Mutex::new(Shared {
            progress: TransferProgress {
                total_files: jobs.len() as u64,
                total_bytes,
                ..TransferProgress::default()
            },
            first_error: None,
        }));
        let op = Arc::new(op);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        debug!(
            files = jobs.len(),
            bytes = total_bytes,
            concurrency = self.concurrency,
            "Dispatching"
        );

        for job in jobs {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| XferError::io("dispatcher closed", std::io::Error::other(e)))?;
            let op = Arc::clone(&op);
            let shared = Arc::clone(&shared);
            let on_progress = on_progress.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let relative = job.relative.clone();
                let size = job.size;
                let result = (*op)(job).await;

                let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                match result {
                    Ok(()) => {
                        guard.progress.processed_files += 1;
                        guard.progress.processed_bytes += size;
                        guard.progress.current_file = Some(relative.to_string());
                        if let Some(cb) = &on_progress {
                            cb(&guard.progress);
                        }
                    }
                    Err(e) => {
                        warn!(path = %relative, code = e.code(), "Transfer failed: {e}");
                        if guard.first_error.is_none() {
                            guard.first_error = Some(e);
                        }
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
                if guard.first_error.is_none() {
                    guard.first_error = Some(XferError::io(
                        "transfer worker panicked",
                        std::io::Error::other(e.to_string()),
                    ));
                }
            }
        }

        let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.first_error.take() {
            Some(e) => Err(e),
            None => Ok(guard.progress.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn tree(files: &[(&str, usize)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (rel, size) in files {
            let p = dir.path().join(rel);
            std::fs::create_dir_all(p.parent().unwrap()).unwrap();
            std::fs::write(&p, vec![b'x'; *size]).unwrap();
        }
        dir
    }

    #[test]
    fn collect_sorted_regular_files() {
        let dir = tree(&[("b.txt", 1), ("a/z.txt", 1), ("a/y.txt", 1)]);
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        let rels: Vec<String> = collect_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| sanitize_relative(dir.path(), p).unwrap().to_string())
            .collect();
        assert_eq!(rels, ["a/y.txt", "a/z.txt", "b.txt"]);
    }

    #[test]
    fn collect_empty_dir_fails_early() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("only/dirs")).unwrap();
        assert!(matches!(
            collect_files(dir.path()),
            Err(XferError::EmptyDirectory(_))
        ));
        assert!(collect_files(&dir.path().join("missing")).unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_concurrency() {
        let names: Vec<String> = (0..12).map(|i| format!("f{i:02}.bin")).collect();
        let layout: Vec<(&str, usize)> = names.iter().map(|n| (n.as_str(), 3)).collect();
        let dir = tree(&layout);
        let files = collect_files(dir.path()).unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let progress = Dispatcher::new(3)
            .run(
                dir.path(),
                files,
                move |_job| {
                    let (f, p) = (Arc::clone(&f), Arc::clone(&p));
                    async move {
                        let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                        p.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(15)).await;
                        f.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                None,
            )
            .await
            .unwrap();

        // Bounded, and the bound is actually reached.
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(progress.processed_files, 12);
        assert_eq!(progress.processed_bytes, 36);
        assert!(progress.is_done());
    }

    #[tokio::test]
    async fn failures_do_not_stop_siblings() {
        let dir = tree(&[
            ("a.txt", 1),
            ("bad-1.txt", 1),
            ("c.txt", 1),
            ("bad-2.txt", 1),
            ("e.txt", 1),
        ]);
        let files = collect_files(dir.path()).unwrap();

        let attempts = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(Mutex::new(TransferProgress::default()));
        let (a, l) = (Arc::clone(&attempts), Arc::clone(&last));
        let cb: ProgressCallback = Arc::new(move |p: &TransferProgress| *l.lock().unwrap() = p.clone());

        let err = Dispatcher::new(2)
            .run(
                dir.path(),
                files,
                move |job| {
                    a.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if job.relative.as_str().starts_with("bad") {
                            Err(XferError::Remote {
                                status: 500,
                                message: job.relative.to_string(),
                            })
                        } else {
                            Ok(())
                        }
                    }
                },
                Some(cb),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, XferError::Remote { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        let last = last.lock().unwrap();
        assert_eq!(last.processed_files, 3);
        assert_eq!(last.total_files, 5);
    }

    #[tokio::test]
    async fn callback_sees_every_file() {
        let dir = tree(&[("docs/readme.txt", 11), ("docs/sub/img.bin", 4)]);
        let files = collect_files(dir.path()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let cb: ProgressCallback = Arc::new(move |p: &TransferProgress| {
            s.lock()
                .unwrap()
                .push((p.processed_files, p.current_file.clone().unwrap()));
        });

        let progress = Dispatcher::new(1)
            .run(dir.path(), files, |_job| async { Ok(()) }, Some(cb))
            .await
            .unwrap();

        assert_eq!(progress.total_bytes, 15);
        assert!((progress.fraction() - 1.0).abs() < f64::EPSILON);
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            [
                (1, "docs/readme.txt".to_string()),
                (2, "docs/sub/img.bin".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn panicking_worker_is_an_error() {
        let dir = tree(&[("a.txt", 1), ("b.txt", 1)]);
        let files = collect_files(dir.path()).unwrap();
        let err = Dispatcher::new(0)
            .run(
                dir.path(),
                files,
                |job| async move {
                    assert!(job.relative.as_str() != "a.txt", "boom");
                    Ok(())
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[tokio::test]
    async fn empty_file_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dispatcher::new(4)
            .run(dir.path(), Vec::new(), |_job| async { Ok(()) }, None)
            .await
            .unwrap_err();
        assert!(matches!(err, XferError::EmptyDirectory(_)));
    }
}
