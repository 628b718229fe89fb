//! Checkpoint stores
//!
//! A store hands out the checkpoint of a job and applies page and window
//! commits to it. Commits go through [`Checkpoint`] mutators, so a store can
//! never persist a checkpoint that breaks the completed-prefix invariant.

use super::checkpoint::Checkpoint;
use super::lock::JobLock;
use super::state::{ResumeError, ResumeState};
use crate::downloader::FetchJob;
use crate::fetcher::PaginationState;
use crate::TimeWindow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Durable record of job progress
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for `job` (empty if none exists)
    fn load(&self, job: &FetchJob) -> Result<Checkpoint, ResumeError>;

    /// Persist pagination progress inside `window`
    fn commit_page(
        &self,
        job: &FetchJob,
        window: TimeWindow,
        state: &PaginationState,
    ) -> Result<(), ResumeError>;

    /// Mark `window` complete and clear its pagination state
    fn commit_window(
        &self,
        job: &FetchJob,
        window: TimeWindow,
        record_count: u64,
    ) -> Result<(), ResumeError>;

    /// Remove all progress for `job`
    fn clear(&self, job: &FetchJob) -> Result<(), ResumeError>;

    /// Take exclusive ownership of `job`'s checkpoint for the duration of a run
    fn lock(&self, _job: &FetchJob) -> Result<Option<JobLock>, ResumeError> {
        Ok(None)
    }
}

fn lock_map<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, ResumeError> {
    mutex
        .lock()
        .map_err(|e| ResumeError::LockError(format!("checkpoint cache poisoned: {e}")))
}

/// Checkpoints as JSON files, one per job, under a resume directory
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, ResumeState>>,
}

impl FileCheckpointStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resume directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the checkpoint file for `job`
    pub fn state_path(&self, job: &FetchJob) -> PathBuf {
        self.dir.join(format!("{}.json", job.job_id()))
    }

    /// Every checkpoint file in the resume directory with its load result
    pub fn list(&self) -> Result<Vec<(PathBuf, Result<ResumeState, ResumeError>)>, ResumeError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| ResumeError::IoError(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let state = ResumeState::load(&path);
                (path, state)
            })
            .collect())
    }

    fn cached_state(&self, job: &FetchJob) -> Result<ResumeState, ResumeError> {
        let job_id = job.job_id();
        if let Some(state) = lock_map(&self.cache)?.get(&job_id) {
            return Ok(state.clone());
        }
        let checkpoint = self.load(job)?;
        Ok(ResumeState::new(
            job.exchange(),
            job.account(),
            job.data_type(),
            checkpoint,
        ))
    }

    fn commit(
        &self,
        job: &FetchJob,
        apply: impl FnOnce(&mut Checkpoint) -> Result<(), ResumeError>,
    ) -> Result<(), ResumeError> {
        let mut state = self.cached_state(job)?;
        let mut checkpoint = state.checkpoint().clone();
        apply(&mut checkpoint)?;
        state.update(checkpoint);

        // Cache only what reached disk
        state.save(&self.state_path(job))?;
        lock_map(&self.cache)?.insert(job.job_id(), state);
        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, job: &FetchJob) -> Result<Checkpoint, ResumeError> {
        let path = self.state_path(job);
        if !path.exists() {
            debug!(job_id = %job.job_id(), "No checkpoint found, starting fresh");
            return Ok(Checkpoint::new(job));
        }

        let state = ResumeState::load(&path)?;
        state.checkpoint().validate(job)?;

        info!(
            job_id = %job.job_id(),
            completed_windows = state.checkpoint().completed().len(),
            frontier = state.checkpoint().frontier(),
            in_progress = state.checkpoint().in_progress().is_some(),
            "Loaded checkpoint"
        );

        let checkpoint = state.checkpoint().clone();
        lock_map(&self.cache)?.insert(job.job_id(), state);
        Ok(checkpoint)
    }

    fn commit_page(
        &self,
        job: &FetchJob,
        window: TimeWindow,
        state: &PaginationState,
    ) -> Result<(), ResumeError> {
        self.commit(job, |checkpoint| checkpoint.record_page(window, state.clone()))
    }

    fn commit_window(
        &self,
        job: &FetchJob,
        window: TimeWindow,
        record_count: u64,
    ) -> Result<(), ResumeError> {
        self.commit(job, |checkpoint| checkpoint.record_window(window, record_count))
    }

    fn clear(&self, job: &FetchJob) -> Result<(), ResumeError> {
        lock_map(&self.cache)?.remove(&job.job_id());
        let path = self.state_path(job);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| ResumeError::IoError(e.to_string()))?;
            info!(path = %path.display(), "Removed checkpoint");
        }
        Ok(())
    }

    fn lock(&self, job: &FetchJob) -> Result<Option<JobLock>, ResumeError> {
        JobLock::try_acquire(&self.state_path(job)).map(Some)
    }
}

/// Non-durable store for runs with resume disabled
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn commit(
        &self,
        job: &FetchJob,
        apply: impl FnOnce(&mut Checkpoint) -> Result<(), ResumeError>,
    ) -> Result<(), ResumeError> {
        let mut checkpoints = lock_map(&self.checkpoints)?;
        let mut checkpoint = checkpoints
            .get(&job.job_id())
            .cloned()
            .unwrap_or_else(|| Checkpoint::new(job));
        apply(&mut checkpoint)?;
        checkpoints.insert(job.job_id(), checkpoint);
        Ok(())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self, job: &FetchJob) -> Result<Checkpoint, ResumeError> {
        Ok(lock_map(&self.checkpoints)?
            .get(&job.job_id())
            .cloned()
            .unwrap_or_else(|| Checkpoint::new(job)))
    }

    fn commit_page(
        &self,
        job: &FetchJob,
        window: TimeWindow,
        state: &PaginationState,
    ) -> Result<(), ResumeError> {
        self.commit(job, |checkpoint| checkpoint.record_page(window, state.clone()))
    }

    fn commit_window(
        &self,
        job: &FetchJob,
        window: TimeWindow,
        record_count: u64,
    ) -> Result<(), ResumeError> {
        self.commit(job, |checkpoint| checkpoint.record_window(window, record_count))
    }

    fn clear(&self, job: &FetchJob) -> Result<(), ResumeError> {
        lock_map(&self.checkpoints)?.remove(&job.job_id());
        Ok(())
    }
}
