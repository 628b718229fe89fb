//! Integration tests for retry timing and window-level failure handling

use crate::support::{last_page, orchestrator, settings, trade, ScriptedExchange, HOUR};
use crypto_history_exporter::downloader::{FetchJob, JobOutcome, RetryPolicy};
use crypto_history_exporter::fetcher::FetchError;
use crypto_history_exporter::output::MemorySink;
use crypto_history_exporter::resume::{CheckpointStore, MemoryCheckpointStore};
use crypto_history_exporter::{DataType, TimeWindow};
use std::sync::Arc;
use std::time::Duration;

fn trades_job(end: i64) -> FetchJob {
    FetchJob::new("binance_pm", "main", DataType::Trades, 0, end).unwrap()
}

fn server_error() -> FetchError {
    FetchError::UpstreamServer {
        status: 502,
        message: "bad gateway".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honored_with_unchanged_cursor() {
    let client = Arc::new(
        ScriptedExchange::new().script(
            0,
            None,
            vec![
                Err(FetchError::RateLimited {
                    retry_after: Some(Duration::from_secs(5)),
                    message: "Too many requests".into(),
                }),
                last_page(vec![trade(1, 100)]),
            ],
        ),
    );
    let job = trades_job(24 * HOUR);
    let (orchestrator, _shutdown) =
        orchestrator(client.clone(), Arc::new(MemoryCheckpointStore::new()), settings());
    let mut sink = MemorySink::new();

    let report = orchestrator.run(&job, &mut sink).await;

    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.progress.retries, 1);

    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].at.duration_since(calls[0].at) >= Duration::from_secs(5));
    assert_eq!(calls[0].state, calls[1].state);
    assert_eq!(calls[0].window, calls[1].window);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_spacing_grows_between_attempts() {
    let client = Arc::new(
        ScriptedExchange::new().script(
            0,
            None,
            vec![
                Err(FetchError::TransientNetwork("timeout".into())),
                Err(FetchError::TransientNetwork("timeout".into())),
                last_page(vec![trade(1, 100)]),
            ],
        ),
    );
    let job = trades_job(24 * HOUR);
    let (orchestrator, _shutdown) =
        orchestrator(client.clone(), Arc::new(MemoryCheckpointStore::new()), settings());
    let mut sink = MemorySink::new();

    assert_eq!(
        orchestrator.run(&job, &mut sink).await.outcome,
        JobOutcome::Completed
    );

    let calls = client.calls();
    assert_eq!(calls.len(), 3);
    let first_gap = calls[1].at.duration_since(calls[0].at);
    let second_gap = calls[2].at.duration_since(calls[1].at);
    assert!(first_gap >= Duration::from_millis(100));
    assert!(second_gap >= Duration::from_millis(200));
    assert!(second_gap > first_gap);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_the_window_and_stop_commits() {
    let client = Arc::new(
        ScriptedExchange::new()
            .script(0, None, vec![Err(server_error()), Err(server_error()), Err(server_error())])
            .script(24 * HOUR, None, vec![last_page(vec![trade(2, 24 * HOUR + 1)])]),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let job = trades_job(48 * HOUR);
    let (orchestrator, _shutdown) = orchestrator(client.clone(), store.clone(), settings());
    let mut sink = MemorySink::new();

    let report = orchestrator.run(&job, &mut sink).await;

    match &report.outcome {
        JobOutcome::PartiallyCompleted { failed_windows } => {
            assert_eq!(failed_windows.len(), 1);
            assert_eq!(failed_windows[0].window, TimeWindow::new(0, 24 * HOUR));
            assert!(failed_windows[0].cause.contains("502"));
        }
        other => panic!("expected partial completion, got {other:?}"),
    }
    assert_eq!(report.progress.windows_failed, 1);

    // max_retries = 2 gives three attempts for the failing page
    let attempts = client.calls().iter().filter(|c| c.window.start == 0).count();
    assert_eq!(attempts, 3);

    // The later window is still exported, but nothing past the gap is checkpointed
    assert_eq!(sink.records().len(), 1);
    let checkpoint = store.load(&job).unwrap();
    assert_eq!(checkpoint.frontier(), 0);
    assert!(checkpoint.completed().is_empty());
    assert!(checkpoint.in_progress().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_response_is_retried_once() {
    let client = Arc::new(
        ScriptedExchange::new().script(
            0,
            None,
            vec![
                Err(FetchError::MalformedResponse("expected value at line 1".into())),
                Err(FetchError::MalformedResponse("expected value at line 1".into())),
                last_page(vec![trade(1, 100)]),
            ],
        ),
    );
    let mut job_settings = settings();
    job_settings.retry = RetryPolicy {
        max_retries: 5,
        ..job_settings.retry
    };
    let job = trades_job(24 * HOUR);
    let (orchestrator, _shutdown) =
        orchestrator(client.clone(), Arc::new(MemoryCheckpointStore::new()), job_settings);
    let mut sink = MemorySink::new();

    let report = orchestrator.run(&job, &mut sink).await;

    assert!(matches!(report.outcome, JobOutcome::PartiallyCompleted { .. }));
    assert_eq!(client.calls().len(), 2);
    assert!(sink.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_without_hint_uses_backoff() {
    let client = Arc::new(
        ScriptedExchange::new().script(
            0,
            None,
            vec![
                Err(FetchError::RateLimited {
                    retry_after: None,
                    message: "Too many requests".into(),
                }),
                last_page(vec![]),
            ],
        ),
    );
    let job = trades_job(24 * HOUR);
    let (orchestrator, _shutdown) =
        orchestrator(client.clone(), Arc::new(MemoryCheckpointStore::new()), settings());
    let mut sink = MemorySink::new();

    assert_eq!(
        orchestrator.run(&job, &mut sink).await.outcome,
        JobOutcome::Completed
    );
    let calls = client.calls();
    let gap = calls[1].at.duration_since(calls[0].at);
    assert!(gap >= Duration::from_millis(100));
    assert!(gap < Duration::from_secs(1));
}
