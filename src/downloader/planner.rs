//! Time range planning
//!
//! Splits the uncompleted part of a job's range into contiguous windows no
//! longer than the exchange's maximum span.

use super::job::FetchJob;
use crate::fetcher::FetchError;
use crate::resume::Checkpoint;
use crate::TimeWindow;

/// Splits job ranges into exchange-legal windows
#[derive(Debug, Clone, Copy)]
pub struct TimeRangePlanner {
    max_span_ms: i64,
}

impl TimeRangePlanner {
    /// Planner for windows of at most `max_span_ms`
    pub fn new(max_span_ms: i64) -> Result<Self, FetchError> {
        if max_span_ms <= 0 {
            return Err(FetchError::FatalConfig(format!(
                "max window span must be positive, got {max_span_ms}ms"
            )));
        }
        Ok(Self { max_span_ms })
    }

    /// Maximum window span (ms)
    pub fn max_span_ms(&self) -> i64 {
        self.max_span_ms
    }

    /// Windows still to fetch for `job`, in chronological order.
    ///
    /// Planning starts at the checkpoint frontier. An in-progress window that
    /// starts there is replayed with its original bounds so its pagination
    /// cursor stays valid even if the span setting changed between runs.
    pub fn plan(&self, job: &FetchJob, checkpoint: &Checkpoint) -> Vec<TimeWindow> {
        let end = job.end();
        let mut cursor = job.start().max(checkpoint.frontier());
        let mut windows = Vec::new();

        if let Some(in_progress) = checkpoint.in_progress() {
            if in_progress.window.start == cursor && in_progress.window.end <= end {
                windows.push(in_progress.window);
                cursor = in_progress.window.end;
            }
        }

        while cursor < end {
            let window_end = cursor.saturating_add(self.max_span_ms).min(end);
            windows.push(TimeWindow::new(cursor, window_end));
            cursor = window_end;
        }

        windows
    }
}
