//! Fetch orchestrator
//!
//! Runs one [`FetchJob`] end to end: take the job lock, load the checkpoint,
//! plan the remaining windows and drain them in chronological order through
//! the [`PaginationDriver`]. Records are streamed to the sink page by page;
//! the sink is flushed before every checkpoint commit, so the checkpoint
//! never runs ahead of delivered data.
//!
//! Once a window fails, later windows are still fetched and delivered but no
//! longer committed: completed windows must form a prefix of the job range,
//! so the next run resumes at the failed window.

use crate::downloader::config::JobSettings;
use crate::downloader::job::{FailedWindow, FetchJob, JobOutcome, JobProgress, JobReport};
use crate::downloader::planner::TimeRangePlanner;
use crate::downloader::progress::{ProgressState, ProgressTracker};
use crate::downloader::rate_limit::RateGovernor;
use crate::fetcher::pagination::WindowCursor;
use crate::fetcher::shared_resources::global_governor;
use crate::fetcher::{ExchangeClient, PaginationDriver, WindowFailure};
use crate::metrics::JobMetrics;
use crate::normalizer;
use crate::output::RecordSink;
use crate::resume::CheckpointStore;
use crate::shutdown::{self, SharedShutdown};
use crate::TimeWindow;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// Composes planner, governor, driver, normalizer and checkpoint store into
/// one resumable job execution
pub struct FetchOrchestrator {
    client: Arc<dyn ExchangeClient>,
    store: Arc<dyn CheckpointStore>,
    settings: JobSettings,
    governor: Option<Arc<RateGovernor>>,
    shutdown: Option<SharedShutdown>,
    progress_tracker: ProgressTracker,
}

impl FetchOrchestrator {
    /// Create an orchestrator.
    ///
    /// Uses the process-wide governor for the job's (exchange, account) and
    /// the global shutdown handle when one is registered.
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        store: Arc<dyn CheckpointStore>,
        settings: JobSettings,
    ) -> Self {
        Self {
            client,
            store,
            settings,
            governor: None,
            shutdown: shutdown::get_global_shutdown(),
            progress_tracker: ProgressTracker::default(),
        }
    }

    /// Use `governor` instead of the process-wide one
    pub fn with_governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Override progress reporting cadence.
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.progress_tracker = tracker;
        self
    }

    /// Settings in use
    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Run `job`, delivering its records to `sink`.
    ///
    /// Never fails: setup, upstream, checkpoint and sink failures all end up
    /// in the report's outcome.
    pub async fn run(&self, job: &FetchJob, sink: &mut dyn RecordSink) -> JobReport {
        let span = tracing::info_span!(
            "fetch_job",
            job_id = %job.job_id(),
            exchange = %job.exchange(),
            account = %job.account(),
            data_type = %job.data_type()
        );
        self.run_inner(job, sink).instrument(span).await
    }

    async fn run_inner(&self, job: &FetchJob, sink: &mut dyn RecordSink) -> JobReport {
        let started = Instant::now();
        let metrics = JobMetrics::start(job);
        let mut report = JobReport::new(job, JobOutcome::Completed);

        info!(start = job.start(), end = job.end(), "Starting export job");
        let outcome = self.execute(job, sink, &mut report.progress, &metrics).await;
        metrics.record_outcome(&outcome);

        report.outcome = outcome;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match &report.outcome {
            JobOutcome::Completed => info!(
                records = report.progress.records_emitted,
                windows = report.progress.windows_completed,
                elapsed_ms = report.elapsed_ms,
                "Export job completed"
            ),
            JobOutcome::PartiallyCompleted { failed_windows } => warn!(
                records = report.progress.records_emitted,
                failed_windows = failed_windows.len(),
                "Export job partially completed"
            ),
            JobOutcome::Aborted { cause, resume_from, .. } => error!(
                cause = %cause,
                resume_from,
                "Export job aborted"
            ),
            JobOutcome::Cancelled { resume_from } => info!(
                resume_from,
                "Export job cancelled, progress saved"
            ),
        }

        report
    }

    async fn execute(
        &self,
        job: &FetchJob,
        sink: &mut dyn RecordSink,
        progress: &mut JobProgress,
        metrics: &JobMetrics,
    ) -> JobOutcome {
        if let Err(e) = self.settings.validate() {
            return aborted(format!("invalid settings: {e}"), None, job.start());
        }
        if !self.client.supports(job.data_type()) {
            return aborted(
                format!("{} does not support {}", self.client.exchange(), job.data_type()),
                None,
                job.start(),
            );
        }
        let Some(normalizer) = normalizer::for_exchange(self.client.exchange(), job.data_type())
        else {
            return aborted(
                format!("no normalizer for {} {}", self.client.exchange(), job.data_type()),
                None,
                job.start(),
            );
        };
        let planner = match TimeRangePlanner::new(self.settings.max_window_span_ms) {
            Ok(planner) => planner,
            Err(e) => return aborted(e, None, job.start()),
        };

        // Held until the run ends
        let _lock = match self.store.lock(job) {
            Ok(lock) => lock,
            Err(e) => return aborted(e, None, job.start()),
        };
        let checkpoint = match self.store.load(job) {
            Ok(checkpoint) => checkpoint,
            Err(e) => return aborted(e, None, job.start()),
        };

        let windows = planner.plan(job, &checkpoint);
        let mut committed_to = checkpoint.frontier();
        progress.windows_planned = windows.len() as u64;
        progress.current_position = Some(committed_to);

        if windows.is_empty() {
            info!(
                completed_windows = checkpoint.completed().len(),
                "Checkpoint already covers the requested range"
            );
            return JobOutcome::Completed;
        }
        info!(
            windows = windows.len(),
            resume_from = committed_to,
            max_span_ms = planner.max_span_ms(),
            "Planned export windows"
        );

        let governor = self.governor.clone().unwrap_or_else(|| {
            global_governor(job.exchange(), job.account(), self.settings.rate_limit)
        });
        let mut driver =
            PaginationDriver::new(self.client.clone(), governor, normalizer, &self.settings);
        if let Some(shutdown) = &self.shutdown {
            driver = driver.with_shutdown(shutdown.clone());
        }

        let mut tracker = self
            .progress_tracker
            .create_state(job.start(), job.end(), windows.len());
        let mut failed_windows: Vec<FailedWindow> = Vec::new();

        'windows: for window in windows {
            let committing = failed_windows.is_empty();
            let mut cursor = match checkpoint.in_progress() {
                Some(in_progress) if in_progress.window == window => {
                    info!(
                        window_start = window.start,
                        window_end = window.end,
                        pages_fetched = in_progress.pagination.pages_fetched,
                        "Resuming window from saved cursor"
                    );
                    WindowCursor::resume(window, in_progress.pagination.clone())
                }
                _ => WindowCursor::new(window),
            };
            debug!(window_start = window.start, window_end = window.end, "Fetching window");

            loop {
                let page = match driver.next_page(job, &mut cursor).await {
                    Ok(page) => page,
                    Err(WindowFailure::Cancelled) => {
                        return JobOutcome::Cancelled {
                            resume_from: committed_to,
                        };
                    }
                    Err(failure) if failure.is_job_fatal() => {
                        error!(
                            window_start = window.start,
                            window_end = window.end,
                            error = %failure,
                            "Job-fatal failure"
                        );
                        return aborted(failure, Some(window), committed_to);
                    }
                    Err(failure) => {
                        warn!(
                            window_start = window.start,
                            window_end = window.end,
                            error = %failure,
                            "Window failed, continuing with the next window"
                        );
                        metrics.record_window_failed();
                        progress.windows_failed += 1;
                        tracker.finish_window(window.end);
                        failed_windows.push(FailedWindow {
                            window,
                            cause: failure.to_string(),
                        });
                        continue 'windows;
                    }
                };

                progress.pages_fetched += 1;
                progress.retries += u64::from(page.retries);
                let mut delivered = 0u64;
                for record in &page.records {
                    match sink.write(record) {
                        Ok(true) => delivered += 1,
                        Ok(false) => {}
                        Err(e) => {
                            return aborted(format!("sink write failed: {e}"), Some(window), committed_to);
                        }
                    }
                }
                if let Err(e) = sink.flush() {
                    return aborted(format!("sink flush failed: {e}"), Some(window), committed_to);
                }
                progress.records_emitted += delivered;
                progress.current_position = cursor.state().last_seen_timestamp.or(Some(window.start));
                tracker.update(delivered, cursor.state().last_seen_timestamp);

                if page.exhausted {
                    break;
                }
                if committing {
                    if let Err(e) = self.store.commit_page(job, window, cursor.state()) {
                        return aborted(e, Some(window), committed_to);
                    }
                }
                self.maybe_report_progress(&mut tracker);
            }

            let record_count = cursor.state().records_emitted;
            if committing {
                if let Err(e) = self.store.commit_window(job, window, record_count) {
                    return aborted(e, Some(window), committed_to);
                }
                committed_to = window.end;
            } else {
                debug!(
                    window_start = window.start,
                    window_end = window.end,
                    "Window fetched after an earlier failure, not committed"
                );
            }

            metrics.record_window_completed();
            progress.windows_completed += 1;
            progress.current_position = Some(window.end);
            tracker.finish_window(window.end);
            info!(
                window_start = window.start,
                window_end = window.end,
                records = record_count,
                committed = committing,
                "Window complete"
            );
            self.maybe_report_progress(&mut tracker);
        }

        if failed_windows.is_empty() {
            JobOutcome::Completed
        } else {
            JobOutcome::PartiallyCompleted { failed_windows }
        }
    }

    fn maybe_report_progress(&self, tracker: &mut ProgressState) {
        if tracker.should_emit_update() {
            info!("{}", tracker.format_progress());
            tracker.mark_emitted();
        }
    }
}

fn aborted(cause: impl Display, window: Option<TimeWindow>, resume_from: i64) -> JobOutcome {
    JobOutcome::Aborted {
        cause: cause.to_string(),
        window,
        resume_from,
    }
}
