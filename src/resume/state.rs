//! Checkpoint file persistence
//!
//! Writes are atomic (temp file, fsync, rename, directory fsync) and
//! coordinated through an fd-lock on a sibling `.lock` file.

use super::checkpoint::Checkpoint;
use crate::DataType;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Current checkpoint file schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// On-disk envelope around a [`Checkpoint`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    schema_version: String,
    exchange: String,
    account: String,
    data_type: DataType,
    checkpoint: Checkpoint,
    metadata: StateMetadata,
    created_at: i64,
    updated_at: i64,
}

impl ResumeState {
    /// Wrap a checkpoint for persistence
    pub fn new(exchange: &str, account: &str, data_type: DataType, checkpoint: Checkpoint) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            exchange: exchange.to_string(),
            account: account.to_string(),
            data_type,
            checkpoint,
            metadata: StateMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Exchange name
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Account name
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Data type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The checkpoint
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Consume the envelope
    pub fn into_checkpoint(self) -> Checkpoint {
        self.checkpoint
    }

    /// Commit counters
    pub fn metadata(&self) -> &StateMetadata {
        &self.metadata
    }

    /// Last update (ms)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Replace the checkpoint after a commit
    pub fn update(&mut self, checkpoint: Checkpoint) {
        self.metadata.total_commits += 1;
        self.metadata.lock_pid = Some(std::process::id());
        self.checkpoint = checkpoint;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Save state to file with atomic writes and file locking
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(
            path = %path.display(),
            completed_windows = self.checkpoint.completed().len(),
            "Saving checkpoint"
        );

        let parent_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let lock_file = open_lock_file(path)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;

        // Data must be on disk before the rename makes it visible
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;

        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        debug!(
            path = %path.display(),
            frontier = self.checkpoint.frontier(),
            commits = self.metadata.total_commits,
            "Checkpoint saved"
        );

        Ok(())
    }

    /// Load state from file with locking
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        debug!(path = %path.display(), "Loading checkpoint");

        let lock_file = open_lock_file(path)?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let state: ResumeState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, path = %path.display(), "Failed to deserialize checkpoint");
            ResumeError::DeserializationError(e.to_string())
        })?;

        if let Err(e) = state.validate_schema_version() {
            warn!(
                found_version = %state.schema_version,
                expected_version = SCHEMA_VERSION,
                "Checkpoint schema version mismatch"
            );
            return Err(e);
        }

        debug!(
            completed_windows = state.checkpoint.completed().len(),
            frontier = state.checkpoint.frontier(),
            "Checkpoint loaded"
        );

        Ok(state)
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, ResumeError> {
    let lock_path = path.with_extension("lock");
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))
}

/// Commit counters of a checkpoint file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateMetadata {
    total_commits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_pid: Option<u32>,
}

impl StateMetadata {
    /// Number of commits written
    pub fn total_commits(&self) -> u64 {
        self.total_commits
    }

    /// Process that last wrote the file
    pub fn lock_pid(&self) -> Option<u32> {
        self.lock_pid
    }
}

/// Errors related to checkpoints
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Checkpoint belongs to a different job
    #[error("checkpoint belongs to job {found}, expected {expected}")]
    JobMismatch {
        /// Expected job id
        expected: String,
        /// Job id found in the checkpoint
        found: String,
    },

    /// A commit or loaded checkpoint breaks the completed-prefix invariant
    #[error("checkpoint invariant violated: {0}")]
    InvariantViolation(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
