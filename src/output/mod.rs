//! Record sinks
//!
//! The orchestrator streams every accepted page into a [`RecordSink`] and
//! flushes it before committing the checkpoint. Sinks deduplicate by record
//! id, so re-delivering records after a resume is harmless.

use crate::NormalizedRecord;
use std::collections::HashSet;

pub mod csv;
pub mod path;

pub use self::csv::CsvRecordSink;
pub use path::OutputPathBuilder;

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// Existing file has different columns
    #[error("existing output {path} has unexpected header: {found}")]
    HeaderMismatch {
        /// File path
        path: String,
        /// Header found in the file
        found: String,
    },

    /// Exchange or account name unusable as a path component
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Timestamp cannot be rendered as a date
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Sink used after close
    #[error("sink is closed")]
    Closed,
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination of a job's normalized records
pub trait RecordSink: Send {
    /// Deliver one record; a record whose id was already delivered is skipped.
    ///
    /// Returns whether the record was written.
    fn write(&mut self, record: &NormalizedRecord) -> OutputResult<bool>;

    /// Make every delivered record durable
    fn flush(&mut self) -> OutputResult<()>;

    /// Flush and release the destination
    fn close(&mut self) -> OutputResult<()>;
}

/// In-memory sink keeping records in delivery order
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<NormalizedRecord>,
    seen_ids: HashSet<String>,
    flushed: usize,
    closed: bool,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Records delivered so far
    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    /// Records covered by the last flush
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Take the delivered records
    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }
}

impl RecordSink for MemorySink {
    fn write(&mut self, record: &NormalizedRecord) -> OutputResult<bool> {
        if self.closed {
            return Err(OutputError::Closed);
        }
        if !self.seen_ids.insert(record.id.clone()) {
            return Ok(false);
        }
        self.records.push(record.clone());
        Ok(true)
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.flushed = self.records.len();
        Ok(())
    }

    fn close(&mut self) -> OutputResult<()> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }
}
