//! Per-job ownership lock
//!
//! Advisory lock via fd-lock on `<state>.owner.lock`, separate from the
//! `.lock` file that serializes individual reads and writes of the state file.

use super::state::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive ownership of one job's checkpoint.
///
/// Held for the lifetime of the value; the OS releases it when the handle closes.
#[derive(Debug)]
pub struct JobLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl JobLock {
    /// Try to take ownership of the checkpoint at `state_path` without blocking
    pub fn try_acquire(state_path: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = state_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
            }
        }

        let lock_path = state_path.with_extension("owner.lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let guard = lock.try_write().map_err(|e| {
            ResumeError::LockError(format!(
                "job is already running elsewhere ({}): {e}",
                lock_path.display()
            ))
        })?;
        // Keep the lock past the guard; it is released when the file closes
        std::mem::forget(guard);

        debug!(path = %lock_path.display(), "Acquired job lock");
        Ok(Self {
            _lock: lock,
            path: lock_path,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
