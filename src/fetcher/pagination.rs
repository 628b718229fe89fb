//! Pagination driver
//!
//! Fetches the pages of one window through an [`ExchangeClient`]. Every call
//! is gated by the account's [`RateGovernor`]; failures go through the
//! [`RetryClassifier`] and a retried call repeats the identical request. The
//! window's [`PaginationState`] only advances after a page has been accepted.
//!
//! Safety mechanisms:
//! - Maximum page count per window to stop adapters that never terminate
//! - Shutdown observed before every call and during every wait

use super::retry::{FailureKind, RetryContext};
use super::{Disposition, ExchangeClient, FetchError, Page, PaginationState, RetryClassifier};
use crate::downloader::config::JobSettings;
use crate::downloader::rate_limit::{RateGovernor, RateLimitError};
use crate::downloader::FetchJob;
use crate::normalizer::{RecordContext, SchemaNormalizer, SchemaValidationError};
use crate::shutdown::SharedShutdown;
use crate::{NormalizedRecord, TimeWindow};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Maximum pages fetched for one window before it is aborted
pub const MAX_PAGES_PER_WINDOW: u64 = 10_000;

/// Why a window could not be drained
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WindowFailure {
    /// Retries exhausted or failure not worth retrying for this window
    #[error("{error} (after {attempts} attempts)")]
    Upstream {
        /// Last failure
        error: FetchError,
        /// Attempts made for the page
        attempts: u32,
    },

    /// Failure that stops the whole job
    #[error("{0}")]
    JobFatal(FetchError),

    /// Rate budget not available before the deadline
    #[error("{0}")]
    RateBudget(RateLimitError),

    /// Record did not match the expected schema
    #[error("schema validation failed: {0}")]
    Schema(SchemaValidationError),

    /// Page went back in time relative to what the window already emitted
    #[error("out-of-order page: record at {found} after watermark {watermark}")]
    OutOfOrder {
        /// Last emitted timestamp
        watermark: i64,
        /// Earliest timestamp in the offending page
        found: i64,
    },

    /// Adapter kept returning pages
    #[error("page limit of {0} exceeded for window")]
    PageLimitExceeded(u64),

    /// Shutdown requested
    #[error("cancelled by shutdown request")]
    Cancelled,
}

impl WindowFailure {
    /// Whether the failure stops the whole job
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, WindowFailure::JobFatal(_))
    }
}

/// Driver-side progress through one window
#[derive(Debug, Clone)]
pub struct WindowCursor {
    window: TimeWindow,
    state: PaginationState,
    seen_ids: HashSet<String>,
    exhausted: bool,
}

impl WindowCursor {
    /// Start `window` from its first page
    pub fn new(window: TimeWindow) -> Self {
        Self::resume(window, PaginationState::default())
    }

    /// Continue `window` from a committed pagination state
    pub fn resume(window: TimeWindow, state: PaginationState) -> Self {
        Self {
            window,
            state,
            seen_ids: HashSet::new(),
            exhausted: false,
        }
    }

    /// The window
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Last accepted pagination state
    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    /// Whether the adapter signalled the end of the window
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Result of one accepted page
#[derive(Debug, Clone, Default)]
pub struct PageOutcome {
    /// New records in emission order
    pub records: Vec<NormalizedRecord>,
    /// Whether this was the last page of the window
    pub exhausted: bool,
    /// Retries spent on the page
    pub retries: u32,
}

/// Drives paged fetches for windows of one job
pub struct PaginationDriver {
    client: Arc<dyn ExchangeClient>,
    governor: Arc<RateGovernor>,
    normalizer: Box<dyn SchemaNormalizer>,
    classifier: RetryClassifier,
    acquire_timeout: Duration,
    shutdown: Option<SharedShutdown>,
}

impl PaginationDriver {
    /// Create a driver
    pub fn new(
        client: Arc<dyn ExchangeClient>,
        governor: Arc<RateGovernor>,
        normalizer: Box<dyn SchemaNormalizer>,
        settings: &JobSettings,
    ) -> Self {
        Self {
            client,
            governor,
            normalizer,
            classifier: RetryClassifier::new(settings.retry),
            acquire_timeout: settings.acquire_timeout,
            shutdown: None,
        }
    }

    /// Observe `shutdown` at every suspension point
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    async fn cancelled(&self) {
        match &self.shutdown {
            Some(shutdown) => shutdown.wait_for_shutdown().await,
            None => std::future::pending().await,
        }
    }

    /// Fetch, normalize and accept the next page of `cursor`'s window
    pub async fn next_page(
        &self,
        job: &FetchJob,
        cursor: &mut WindowCursor,
    ) -> Result<PageOutcome, WindowFailure> {
        if cursor.exhausted {
            return Ok(PageOutcome {
                exhausted: true,
                ..PageOutcome::default()
            });
        }
        if cursor.state.pages_fetched >= MAX_PAGES_PER_WINDOW {
            warn!(
                job_id = %job.job_id(),
                window = %cursor.window,
                "Page limit reached, adapter never signalled the end of the window"
            );
            return Err(WindowFailure::PageLimitExceeded(MAX_PAGES_PER_WINDOW));
        }

        let data_type = job.data_type();
        let cost = self.client.request_weight(data_type);
        let max_retries = self.classifier.policy().max_retries;
        let mut attempt: u32 = 0;
        let mut last_error: Option<FetchError> = None;

        loop {
            if self.shutdown_requested() {
                return Err(WindowFailure::Cancelled);
            }

            let waited = tokio::select! {
                _ = self.cancelled() => return Err(WindowFailure::Cancelled),
                acquired = self.governor.acquire(cost, self.acquire_timeout) => {
                    acquired.map_err(WindowFailure::RateBudget)?
                }
            };
            crate::metrics::record_rate_wait(job.exchange(), waited);

            let result = tokio::select! {
                _ = self.cancelled() => return Err(WindowFailure::Cancelled),
                result = self.client.fetch_page(data_type, &cursor.window, &cursor.state) => result,
            };

            let err = match result {
                Ok(page) => {
                    if let Some(previous) = &last_error {
                        let ctx = RetryContext::new(
                            attempt,
                            max_retries,
                            previous,
                            Duration::ZERO,
                            job.job_id(),
                            Some(cursor.window),
                        );
                        info!("{}", ctx.format_success());
                    }
                    let mut outcome = self.accept_page(job, cursor, page).await?;
                    outcome.retries = attempt;
                    return Ok(outcome);
                }
                Err(err) => err,
            };

            match self.classifier.classify(&err, attempt) {
                Disposition::Retry(delay) => {
                    attempt += 1;
                    let ctx = RetryContext::new(
                        attempt,
                        max_retries,
                        &err,
                        delay,
                        job.job_id(),
                        Some(cursor.window),
                    );
                    warn!(
                        job_id = %job.job_id(),
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "{}",
                        ctx.format_retry()
                    );
                    crate::metrics::record_retry(job.exchange(), FailureKind::of(&err), delay);

                    tokio::select! {
                        _ = self.cancelled() => return Err(WindowFailure::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    last_error = Some(err);
                }
                Disposition::AbortWindow => {
                    let ctx = RetryContext::new(
                        attempt + 1,
                        max_retries,
                        &err,
                        Duration::ZERO,
                        job.job_id(),
                        Some(cursor.window),
                    );
                    warn!("{}", ctx.format_failure());
                    return Err(WindowFailure::Upstream {
                        error: err,
                        attempts: attempt + 1,
                    });
                }
                Disposition::AbortJob => return Err(WindowFailure::JobFatal(err)),
            }
        }
    }

    /// Drain the rest of `cursor`'s window, collecting every record
    pub async fn drive_window(
        &self,
        job: &FetchJob,
        cursor: &mut WindowCursor,
    ) -> Result<Vec<NormalizedRecord>, WindowFailure> {
        let mut records = Vec::new();
        while !cursor.is_exhausted() {
            let outcome = self.next_page(job, cursor).await?;
            records.extend(outcome.records);
        }
        Ok(records)
    }

    async fn accept_page(
        &self,
        job: &FetchJob,
        cursor: &mut WindowCursor,
        page: Page,
    ) -> Result<PageOutcome, WindowFailure> {
        if let Some(used) = page.used_weight {
            self.governor.reconcile_used_weight(used).await;
        }

        let ctx = RecordContext {
            exchange: job.exchange(),
            account: job.account(),
            data_type: job.data_type(),
        };

        let fetched = page.records.len();
        let mut keyed = Vec::with_capacity(fetched);
        for raw in &page.records {
            // Records outside the window belong to a neighbouring window
            if !cursor.window.contains(raw.timestamp) {
                continue;
            }
            let record = self
                .normalizer
                .normalize(&ctx, raw)
                .map_err(WindowFailure::Schema)?;
            keyed.push(record);
        }
        // Same-millisecond records tie-break on their unique id
        keyed.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));

        let mut records = Vec::with_capacity(keyed.len());
        for record in keyed {
            if cursor.seen_ids.insert(record.id.clone()) {
                records.push(record);
            }
        }

        if let (Some(watermark), Some(first)) = (cursor.state.last_seen_timestamp, records.first()) {
            if first.timestamp < watermark {
                return Err(WindowFailure::OutOfOrder {
                    watermark,
                    found: first.timestamp,
                });
            }
        }

        let exhausted = page.records.is_empty() || page.next_cursor.is_none();
        cursor.state.pages_fetched += 1;
        cursor.state.records_emitted += records.len() as u64;
        if let Some(last) = records.last() {
            cursor.state.last_seen_timestamp = Some(last.timestamp);
        }
        cursor.state.cursor = page.next_cursor;
        cursor.exhausted = exhausted;

        debug!(
            job_id = %job.job_id(),
            window = %cursor.window,
            page = cursor.state.pages_fetched,
            fetched,
            emitted = records.len(),
            exhausted,
            "Accepted page"
        );
        crate::metrics::record_page(job.exchange(), job.data_type(), records.len());

        Ok(PageOutcome {
            records,
            exhausted,
            retries: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::config::{RateLimitSettings, RetryPolicy};
    use crate::fetcher::{FetchResult, RawRecord};
    use crate::DataType;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<VecDeque<FetchResult<Page>>>,
        calls: Mutex<Vec<PaginationState>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<FetchResult<Page>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExchangeClient for ScriptedClient {
        fn exchange(&self) -> &str {
            "binance_pm"
        }

        fn supports(&self, _data_type: DataType) -> bool {
            true
        }

        fn request_weight(&self, _data_type: DataType) -> u32 {
            1
        }

        async fn fetch_page(
            &self,
            _data_type: DataType,
            _window: &TimeWindow,
            state: &PaginationState,
        ) -> FetchResult<Page> {
            self.calls.lock().unwrap().push(state.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::empty()))
        }
    }

    fn funding(ts: i64, fee: &str) -> RawRecord {
        RawRecord {
            native_id: None,
            timestamp: ts,
            payload: json!({"symbol": "BTCUSDT", "fee": fee, "time": ts}),
        }
    }

    fn page(records: Vec<RawRecord>, next: Option<&str>) -> Page {
        Page {
            records,
            next_cursor: next.map(str::to_string),
            cost: 1,
            used_weight: None,
        }
    }

    fn driver(client: Arc<ScriptedClient>) -> PaginationDriver {
        let settings = JobSettings {
            retry: RetryPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                max_retries: 2,
                jitter: false,
            },
            ..JobSettings::default()
        };
        let governor = Arc::new(RateGovernor::new("binance_pm/main", RateLimitSettings::default()));
        PaginationDriver::new(
            client,
            governor,
            crate::normalizer::for_exchange("binance_pm", DataType::Funding).unwrap(),
            &settings,
        )
    }

    fn job() -> FetchJob {
        FetchJob::new("binance_pm", "main", DataType::Funding, 0, 1000).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_until_cursor_is_null() {
        let client = ScriptedClient::new(vec![
            Ok(page(vec![funding(20, "1"), funding(10, "2")], Some("2"))),
            Ok(page(vec![funding(30, "3")], None)),
        ]);
        let driver = driver(client.clone());
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        let records = driver.drive_window(&job(), &mut cursor).await.unwrap();
        let timestamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
        assert_eq!(cursor.state().pages_fetched, 2);
        assert_eq!(cursor.state().last_seen_timestamp, Some(30));

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[0].cursor, None);
        assert_eq!(calls[1].cursor.as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_repeats_identical_request() {
        let client = ScriptedClient::new(vec![
            Ok(page(vec![funding(10, "1")], Some("2"))),
            Err(FetchError::TransientNetwork("reset".into())),
            Ok(page(vec![funding(20, "2")], None)),
        ]);
        let driver = driver(client.clone());
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        driver.next_page(&job(), &mut cursor).await.unwrap();
        let outcome = driver.next_page(&job(), &mut cursor).await.unwrap();
        assert_eq!(outcome.retries, 1);
        assert!(outcome.exhausted);

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls[1], calls[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_abort_window_without_advancing() {
        let client = ScriptedClient::new(vec![
            Err(FetchError::UpstreamServer { status: 502, message: "bad gateway".into() }),
            Err(FetchError::UpstreamServer { status: 502, message: "bad gateway".into() }),
            Err(FetchError::UpstreamServer { status: 502, message: "bad gateway".into() }),
        ]);
        let driver = driver(client.clone());
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        let err = driver.next_page(&job(), &mut cursor).await.unwrap_err();
        assert!(matches!(err, WindowFailure::Upstream { attempts: 3, .. }));
        assert_eq!(cursor.state(), &PaginationState::default());
        assert_eq!(client.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_job_fatal() {
        let client = ScriptedClient::new(vec![Err(FetchError::Auth("invalid key".into()))]);
        let driver = driver(client);
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        let err = driver.next_page(&job(), &mut cursor).await.unwrap_err();
        assert!(err.is_job_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_and_out_of_window_records_dropped() {
        let client = ScriptedClient::new(vec![
            Ok(page(vec![funding(10, "1"), funding(5000, "9")], Some("2"))),
            Ok(page(vec![funding(10, "1"), funding(20, "2")], None)),
        ]);
        let driver = driver(client);
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        let records = driver.drive_window(&job(), &mut cursor).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(cursor.state().records_emitted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_going_back_in_time_fails_window() {
        let client = ScriptedClient::new(vec![
            Ok(page(vec![funding(50, "1")], Some("2"))),
            Ok(page(vec![funding(40, "2")], None)),
        ]);
        let driver = driver(client);
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        let err = driver.drive_window(&job(), &mut cursor).await.unwrap_err();
        assert_eq!(err, WindowFailure::OutOfOrder { watermark: 50, found: 40 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_schema_error_fails_window_without_retry() {
        let bad = RawRecord {
            native_id: None,
            timestamp: 10,
            payload: json!({"symbol": "BTCUSDT"}),
        };
        let client = ScriptedClient::new(vec![Ok(page(vec![bad], None))]);
        let driver = driver(client.clone());
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        let err = driver.next_page(&job(), &mut cursor).await.unwrap_err();
        assert!(matches!(err, WindowFailure::Schema(_)));
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let client = ScriptedClient::new(vec![Err(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
            message: "429".into(),
        })]);
        let shutdown = crate::shutdown::ShutdownCoordinator::shared();
        let driver = driver(client).with_shutdown(shutdown.clone());
        let mut cursor = WindowCursor::new(TimeWindow::new(0, 1000));

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.request_shutdown();
        });

        let err = driver.next_page(&job(), &mut cursor).await.unwrap_err();
        assert_eq!(err, WindowFailure::Cancelled);
    }
}
