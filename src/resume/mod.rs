//! Checkpointing for fetch jobs
//!
//! Provides persistent checkpoint management with atomic writes and file locking.

pub mod checkpoint;
pub mod lock;
pub mod state;
pub mod store;

pub use checkpoint::{Checkpoint, CompletedWindow, InProgressWindow};
pub use lock::JobLock;
pub use state::{ResumeError, ResumeState, StateMetadata};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
