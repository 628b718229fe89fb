//! Integration tests for the Prometheus metrics endpoint
//!
//! The recorder is process-global, so everything runs in one test against a
//! single listener.

use crypto_history_exporter::downloader::{FetchJob, JobOutcome};
use crypto_history_exporter::metrics::{self, HttpRequestMetrics, JobMetrics};
use crypto_history_exporter::DataType;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;

/// Helper to fetch metrics text from endpoint
async fn fetch_metrics_text(addr: &str) -> Result<String, Box<dyn std::error::Error>> {
    let url = format!("http://{}/metrics", addr);
    let resp = reqwest::get(&url).await?;
    Ok(resp.text().await?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_endpoint_exposes_export_metrics() {
    let addr: SocketAddr = "127.0.0.1:19190".parse().unwrap();
    metrics::init_metrics(addr).await.unwrap();
    // Second call is a no-op
    metrics::init_metrics(addr).await.unwrap();
    assert!(metrics::is_initialized().await);
    sleep(Duration::from_millis(100)).await;

    let request = HttpRequestMetrics::start("/papi/v1/pm/trade").await;
    request.record_complete(200);
    let limited = HttpRequestMetrics::start("/papi/v1/pm/trade").await;
    limited.record_complete(429);

    metrics::record_page("binance_pm", DataType::Trades, 7);
    metrics::record_api_weight("binance_pm/main", 120, 6000);

    let job = FetchJob::new("binance_pm", "main", DataType::Trades, 0, 1000).unwrap();
    let job_metrics = JobMetrics::start(&job);
    job_metrics.record_window_completed();
    job_metrics.record_outcome(&JobOutcome::Completed);

    let text = fetch_metrics_text("127.0.0.1:19190").await.unwrap();

    assert!(text.contains("# TYPE"));
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("http_request_duration_seconds"));
    assert!(text.contains("pages_fetched_total"));
    assert!(text.contains("records_emitted_total"));
    assert!(text.contains("api_weight_used"));
    assert!(text.contains("windows_completed_total"));
    assert!(text.contains("jobs_completed_total"));
}
