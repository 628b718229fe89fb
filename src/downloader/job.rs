//! Fetch job identity, outcome and progress tracking

use crate::{DataType, TimeWindow};
use serde::{Deserialize, Serialize};

/// Errors raised while creating a job
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Requested range ends before it starts
    #[error("invalid range: start ({start}) is after end ({end})")]
    InvalidRange {
        /// Requested start (ms)
        start: i64,
        /// Requested end (ms)
        end: i64,
    },

    /// Identity field missing
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

/// One (exchange, account, data type, range) export unit.
///
/// Immutable once created; the checkpoint of a job is keyed by [`FetchJob::job_id`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchJob {
    exchange: String,
    account: String,
    data_type: DataType,
    start: i64,
    end: i64,
}

impl FetchJob {
    /// Create a job for `[start, end)`.
    ///
    /// A zero-length range is legal and plans no windows.
    pub fn new(
        exchange: impl Into<String>,
        account: impl Into<String>,
        data_type: DataType,
        start: i64,
        end: i64,
    ) -> Result<Self, JobError> {
        let exchange = exchange.into();
        let account = account.into();

        check_name("exchange", &exchange)?;
        check_name("account", &account)?;
        if start > end {
            return Err(JobError::InvalidRange { start, end });
        }

        Ok(Self {
            exchange,
            account,
            data_type,
            start,
            end,
        })
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

    /// Requested start (ms, inclusive)
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Requested end (ms, exclusive)
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Full requested range
    pub fn range(&self) -> TimeWindow {
        TimeWindow::new(self.start, self.end)
    }

    /// Deterministic identifier, safe to use as a file stem.
    ///
    /// Names are restricted by [`check_name`], so distinct jobs never share an id.
    pub fn job_id(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.exchange,
            self.account,
            self.data_type,
            self.start,
            self.end
        )
    }
}

impl std::fmt::Display for FetchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{} [{}, {})",
            self.exchange, self.account, self.data_type, self.start, self.end
        )
    }
}

/// Exchange and account names end up in file names and job ids, so they are
/// limited to `[A-Za-z0-9_-]`
pub fn check_name(kind: &str, value: &str) -> Result<(), JobError> {
    if value.is_empty() {
        return Err(JobError::InvalidJob(format!("{kind} cannot be empty")));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(JobError::InvalidJob(format!(
            "{kind} '{value}' contains '{bad}'; only letters, digits, '-' and '_' are allowed"
        )));
    }
    Ok(())
}

/// A window that did not complete, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWindow {
    /// The window
    pub window: TimeWindow,
    /// Why it failed
    pub cause: String,
}

/// Final state of a job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Every window completed
    Completed,
    /// Some windows failed; the rest of the range was fetched
    PartiallyCompleted {
        /// Failed windows in chronological order
        failed_windows: Vec<FailedWindow>,
    },
    /// A job-fatal error stopped the run
    Aborted {
        /// Cause of the abort
        cause: String,
        /// Window being fetched when the job aborted
        window: Option<TimeWindow>,
        /// Timestamp up to which the checkpoint is complete
        resume_from: i64,
    },
    /// Shutdown was requested before the job finished
    Cancelled {
        /// Timestamp up to which the checkpoint is complete
        resume_from: i64,
    },
}

impl JobOutcome {
    /// Whether every window completed
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed)
    }

    /// Short status label
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::PartiallyCompleted { .. } => "partially_completed",
            JobOutcome::Aborted { .. } => "aborted",
            JobOutcome::Cancelled { .. } => "cancelled",
        }
    }
}

/// Job progress counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Windows planned for this run
    pub windows_planned: u64,
    /// Windows fully drained in this run
    pub windows_completed: u64,
    /// Windows aborted in this run
    pub windows_failed: u64,
    /// Pages fetched successfully
    pub pages_fetched: u64,
    /// Records delivered to the sink
    pub records_emitted: u64,
    /// Retries attempted
    pub retries: u64,
    /// Current position (timestamp in milliseconds)
    pub current_position: Option<i64>,
}

impl JobProgress {
    /// Window completion percentage (0.0 to 100.0)
    pub fn percentage(&self) -> Option<f64> {
        if self.windows_planned == 0 {
            return None;
        }
        let done = self.windows_completed + self.windows_failed;
        Some((done as f64 / self.windows_planned as f64) * 100.0)
    }
}

/// Report produced by one job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Job identifier
    pub job_id: String,
    /// Exchange name
    pub exchange: String,
    /// Account name
    pub account: String,
    /// Data type
    pub data_type: DataType,
    /// Final outcome
    pub outcome: JobOutcome,
    /// Counters
    pub progress: JobProgress,
    /// Wall time of the run in milliseconds
    pub elapsed_ms: u64,
}

impl JobReport {
    /// Create an empty report for `job`
    pub fn new(job: &FetchJob, outcome: JobOutcome) -> Self {
        Self {
            job_id: job.job_id(),
            exchange: job.exchange().to_string(),
            account: job.account().to_string(),
            data_type: job.data_type(),
            outcome,
            progress: JobProgress::default(),
            elapsed_ms: 0,
        }
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} {}: {} records, {} pages, {}/{} windows",
            self.job_id,
            self.outcome.label(),
            self.progress.records_emitted,
            self.progress.pages_fetched,
            self.progress.windows_completed,
            self.progress.windows_planned,
        );
        match &self.outcome {
            JobOutcome::Completed => {}
            JobOutcome::PartiallyCompleted { failed_windows } => {
                for failed in failed_windows {
                    line.push_str(&format!("; window {} failed: {}", failed.window, failed.cause));
                }
            }
            JobOutcome::Aborted {
                cause,
                window,
                resume_from,
            } => {
                if let Some(window) = window {
                    line.push_str(&format!("; aborted in window {window}"));
                }
                line.push_str(&format!(": {cause}; resume from {resume_from}"));
            }
            JobOutcome::Cancelled { resume_from } => {
                line.push_str(&format!("; resume from {resume_from}"));
            }
        }
        line
    }
}
