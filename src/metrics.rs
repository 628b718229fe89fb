//! Observability metrics for export jobs
//!
//! Counters and histograms for HTTP calls, pages, retries, rate-governor
//! waits, windows and jobs, recorded through the `metrics` facade.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for an optional scrape endpoint (`--metrics-addr`)
//! - Without an installed recorder every call is a no-op

use crate::downloader::{FetchJob, JobOutcome};
use crate::fetcher::retry::FailureKind;
use crate::DataType;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: Lazy<Arc<RwLock<u64>>> = Lazy::new(|| Arc::new(RwLock::new(0)));

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: a second call is a no-op.
///
/// # Arguments
/// * `addr` - Socket address to bind the Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to exchange APIs"
    );
    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );
    describe_counter!(
        "pages_fetched_total",
        Unit::Count,
        "Pages accepted by the pagination driver"
    );
    describe_counter!(
        "records_emitted_total",
        Unit::Count,
        "Normalized records emitted after deduplication"
    );
    describe_counter!(
        "fetch_retries_total",
        Unit::Count,
        "Total number of page retry attempts"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Delay before a page retry in seconds"
    );
    describe_histogram!(
        "rate_governor_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for rate budget"
    );
    describe_gauge!(
        "api_weight_used",
        Unit::Count,
        "Weight the exchange reports as used in its current interval"
    );
    describe_counter!(
        "windows_completed_total",
        Unit::Count,
        "Time windows fully drained and checkpointed"
    );
    describe_counter!(
        "windows_failed_total",
        Unit::Count,
        "Time windows abandoned after a window-fatal failure"
    );
    describe_counter!(
        "jobs_completed_total",
        Unit::Count,
        "Export jobs that completed every window"
    );
    describe_counter!(
        "jobs_failed_total",
        Unit::Count,
        "Export jobs that ended partially completed, aborted or cancelled"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub async fn generate_correlation_id() -> String {
    let mut counter = CORRELATION_COUNTER.write().await;
    *counter += 1;
    format!("req-{:08x}", *counter)
}

/// Timing and outcome of one HTTP request
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub async fn start(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id().await;

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            "Starting HTTP request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 || status_code == 418 {
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                status = status_code,
                duration_ms = duration.as_millis() as u64,
                "Rate limit response recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis() as u64,
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => "network_error",
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            duration_ms = duration.as_millis() as u64,
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record time spent in `RateGovernor::acquire`
pub fn record_rate_wait(exchange: &str, waited: Duration) {
    histogram!(
        "rate_governor_wait_seconds",
        "exchange" => exchange.to_string(),
    )
    .record(waited.as_secs_f64());
}

/// Record one page retry and its backoff
pub fn record_retry(exchange: &str, kind: FailureKind, backoff: Duration) {
    counter!(
        "fetch_retries_total",
        "exchange" => exchange.to_string(),
        "kind" => kind.description(),
    )
    .increment(1);

    histogram!(
        "retry_backoff_duration_seconds",
        "exchange" => exchange.to_string(),
    )
    .record(backoff.as_secs_f64());
}

/// Record one accepted page and the records it emitted
pub fn record_page(exchange: &str, data_type: DataType, records: usize) {
    counter!(
        "pages_fetched_total",
        "exchange" => exchange.to_string(),
        "data_type" => data_type.as_str(),
    )
    .increment(1);

    counter!(
        "records_emitted_total",
        "exchange" => exchange.to_string(),
        "data_type" => data_type.as_str(),
    )
    .increment(records as u64);
}

/// Record exchange-reported weight usage against the configured ceiling
pub fn record_api_weight(governor: &str, used: u32, limit: u32) {
    gauge!("api_weight_used", "governor" => governor.to_string()).set(used as f64);

    let usage_percent = if limit == 0 {
        100.0
    } else {
        (used as f64 / limit as f64) * 100.0
    };
    if usage_percent >= 80.0 {
        warn!(
            governor = %governor,
            used,
            limit,
            usage_percent,
            "API weight usage exceeds 80% threshold"
        );
    }
}

/// Per-job window and outcome counters
pub struct JobMetrics {
    exchange: String,
    data_type: DataType,
    start_time: Instant,
}

impl JobMetrics {
    /// Start tracking `job`
    pub fn start(job: &FetchJob) -> Self {
        Self {
            exchange: job.exchange().to_string(),
            data_type: job.data_type(),
            start_time: Instant::now(),
        }
    }

    /// A window was drained and committed
    pub fn record_window_completed(&self) {
        counter!(
            "windows_completed_total",
            "exchange" => self.exchange.clone(),
            "data_type" => self.data_type.as_str(),
        )
        .increment(1);
    }

    /// A window was abandoned
    pub fn record_window_failed(&self) {
        counter!(
            "windows_failed_total",
            "exchange" => self.exchange.clone(),
            "data_type" => self.data_type.as_str(),
        )
        .increment(1);
    }

    /// Final job outcome
    pub fn record_outcome(&self, outcome: &JobOutcome) {
        let name = if outcome.is_completed() {
            "jobs_completed_total"
        } else {
            "jobs_failed_total"
        };
        counter!(
            name,
            "exchange" => self.exchange.clone(),
            "data_type" => self.data_type.as_str(),
            "status" => outcome.label(),
        )
        .increment(1);

        debug!(
            exchange = %self.exchange,
            data_type = %self.data_type,
            status = outcome.label(),
            duration_secs = self.start_time.elapsed().as_secs(),
            "Job outcome recorded"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
