//! Checkpoint of a fetch job
//!
//! Completed windows always form a contiguous prefix of the job's range
//! starting at the requested start; the in-progress window, if any, begins
//! exactly where that prefix ends. Every mutator enforces this.

use super::state::ResumeError;
use crate::downloader::FetchJob;
use crate::fetcher::PaginationState;
use crate::TimeWindow;
use serde::{Deserialize, Serialize};

/// A fully drained window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedWindow {
    /// The window (end-exclusive)
    pub window: TimeWindow,
    /// Records emitted from the window
    pub record_count: u64,
    /// When the window was committed (ms)
    pub completed_at: i64,
}

/// A window interrupted mid-pagination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressWindow {
    /// The window (end-exclusive)
    pub window: TimeWindow,
    /// Last committed pagination state
    pub pagination: PaginationState,
}

/// Durable progress of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    job_id: String,
    range_start: i64,
    range_end: i64,
    completed: Vec<CompletedWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    in_progress: Option<InProgressWindow>,
}

impl Checkpoint {
    /// Empty checkpoint for `job`
    pub fn new(job: &FetchJob) -> Self {
        Self {
            job_id: job.job_id(),
            range_start: job.start(),
            range_end: job.end(),
            completed: Vec::new(),
            in_progress: None,
        }
    }

    /// Job identifier
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Job range the checkpoint covers
    pub fn range(&self) -> TimeWindow {
        TimeWindow::new(self.range_start, self.range_end)
    }

    /// Completed windows in chronological order
    pub fn completed(&self) -> &[CompletedWindow] {
        &self.completed
    }

    /// Window interrupted mid-pagination
    pub fn in_progress(&self) -> Option<&InProgressWindow> {
        self.in_progress.as_ref()
    }

    /// End of the last completed window
    pub fn last_completed_end(&self) -> Option<i64> {
        self.completed.last().map(|c| c.window.end)
    }

    /// Timestamp up to which the job is complete
    pub fn frontier(&self) -> i64 {
        self.last_completed_end().unwrap_or(self.range_start)
    }

    /// Whether the completed windows cover the whole range
    pub fn is_complete(&self) -> bool {
        self.frontier() >= self.range_end
    }

    /// Total records committed across completed windows
    pub fn total_records(&self) -> u64 {
        self.completed.iter().map(|c| c.record_count).sum()
    }

    /// Record pagination progress inside the window at the frontier
    pub fn record_page(
        &mut self,
        window: TimeWindow,
        pagination: PaginationState,
    ) -> Result<(), ResumeError> {
        self.check_next_window(&window)?;
        self.in_progress = Some(InProgressWindow { window, pagination });
        Ok(())
    }

    /// Mark the window at the frontier complete and clear its pagination state
    pub fn record_window(&mut self, window: TimeWindow, record_count: u64) -> Result<(), ResumeError> {
        self.check_next_window(&window)?;
        self.completed.push(CompletedWindow {
            window,
            record_count,
            completed_at: chrono::Utc::now().timestamp_millis(),
        });
        self.in_progress = None;
        Ok(())
    }

    /// Check the checkpoint belongs to `job` and satisfies the prefix invariant
    pub fn validate(&self, job: &FetchJob) -> Result<(), ResumeError> {
        let expected = job.job_id();
        if self.job_id != expected {
            return Err(ResumeError::JobMismatch {
                expected,
                found: self.job_id.clone(),
            });
        }
        if self.range_start != job.start() || self.range_end != job.end() {
            return Err(ResumeError::InvariantViolation(format!(
                "checkpoint range [{}, {}) does not match job range {}",
                self.range_start,
                self.range_end,
                job.range()
            )));
        }

        let mut cursor = self.range_start;
        for completed in &self.completed {
            if completed.window.start != cursor {
                return Err(ResumeError::InvariantViolation(format!(
                    "completed window {} does not start at {cursor}",
                    completed.window
                )));
            }
            if completed.window.is_empty() || completed.window.end > self.range_end {
                return Err(ResumeError::InvariantViolation(format!(
                    "completed window {} is empty or exceeds the job range",
                    completed.window
                )));
            }
            cursor = completed.window.end;
        }

        if let Some(in_progress) = &self.in_progress {
            if in_progress.window.start != cursor
                || in_progress.window.is_empty()
                || in_progress.window.end > self.range_end
            {
                return Err(ResumeError::InvariantViolation(format!(
                    "in-progress window {} does not follow completed prefix ending at {cursor}",
                    in_progress.window
                )));
            }
        }

        Ok(())
    }

    fn check_next_window(&self, window: &TimeWindow) -> Result<(), ResumeError> {
        let frontier = self.frontier();
        if window.start != frontier {
            return Err(ResumeError::InvariantViolation(format!(
                "window {window} does not start at checkpoint frontier {frontier}"
            )));
        }
        if window.is_empty() || window.end > self.range_end {
            return Err(ResumeError::InvariantViolation(format!(
                "window {window} is empty or exceeds job end {}",
                self.range_end
            )));
        }
        Ok(())
    }
}
