//! Memory-bounded chunking execution.
//!
//! The chunk store for a large repository can hold the repository's entire
//! byte content in memory. To keep several concurrent client invocations on
//! one host from multiplying that peak, chunking passes are serialized
//! behind a host-wide file lock: acquisition blocks with no timeout, so a
//! stuck invocation holds up later ones rather than letting them pile up
//! memory. The pass itself runs on a dedicated worker thread and hands its
//! result back over a single-use channel; both the map and the store are
//! plain owned values that are freed as soon as the transmission that
//! consumes them completes.

use crate::chunker;
use crate::errors::ContextError;
use crate::filemap::{ChunkStore, FileNode};
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::debug;

/// Lock file name under the system lock directory.
pub const LOCK_FILE_NAME: &str = "visor-upload.lock";

/// Well-known location of the host-wide upload lock.
pub fn default_lock_path() -> PathBuf {
    let lock_dir = Path::new("/var/lock");
    if lock_dir.is_dir() {
        lock_dir.join(LOCK_FILE_NAME)
    } else {
        std::env::temp_dir().join(LOCK_FILE_NAME)
    }
}

/// Host-wide exclusive lock, released on drop (including unwinds), so a
/// crashed holder never wedges the host: the OS drops the lock with the
/// process.
pub struct UploadLock {
    file: File,
    path: PathBuf,
}

impl UploadLock {
    /// Acquire the lock at the well-known location, blocking until free.
    pub fn acquire() -> Result<Self, ContextError> {
        Self::acquire_at(&default_lock_path())
    }

    /// Acquire the lock at `path`, blocking until free.
    pub fn acquire_at(path: &Path) -> Result<Self, ContextError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ContextError::io(path, e))?;
        debug!(path = %path.display(), "waiting for upload lock");
        file.lock_exclusive().map_err(|e| ContextError::io(path, e))?;
        debug!(path = %path.display(), "upload lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Run the chunking pass for `files` under the host-wide lock.
pub fn run_bounded(
    root: &Path,
    files: &BTreeSet<PathBuf>,
) -> Result<(FileNode, ChunkStore), ContextError> {
    run_bounded_at(root, files, &default_lock_path())
}

/// [`run_bounded`] with an explicit lock path.
pub fn run_bounded_at(
    root: &Path,
    files: &BTreeSet<PathBuf>,
    lock_path: &Path,
) -> Result<(FileNode, ChunkStore), ContextError> {
    let _lock = UploadLock::acquire_at(lock_path)?;
    let root = root.to_path_buf();
    let files = files.clone();
    run_on_worker(move || chunker::chunk(&root, &files))
}

/// Run `job` on a dedicated worker thread, returning its result through a
/// single-use channel. A worker that dies without sending (a panic, or a
/// spawn failure) maps to [`ContextError::WorkerExited`] carrying whatever
/// detail is available.
fn run_on_worker<T, F>(job: F) -> Result<T, ContextError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ContextError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    let handle = std::thread::Builder::new()
        .name("visor-chunker".to_string())
        .spawn(move || {
            let _ = tx.send(job());
        })
        .map_err(|e| ContextError::WorkerExited(format!("spawn failed: {e}")))?;

    match rx.recv() {
        Ok(result) => {
            let _ = handle.join();
            result
        }
        Err(_) => {
            let detail = match handle.join() {
                Err(panic) => panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "worker panicked".to_string()),
                Ok(()) => "worker terminated silently".to_string(),
            };
            Err(ContextError::WorkerExited(detail))
        }
    }
}
