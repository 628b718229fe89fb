//! Integration tests for window orchestration, job aborts and crash recovery

use crate::support::{last_page, orchestrator, page, settings, trade, ScriptedExchange, HOUR};
use crypto_history_exporter::downloader::{FetchJob, JobOutcome};
use crypto_history_exporter::fetcher::FetchError;
use crypto_history_exporter::output::{CsvRecordSink, MemorySink, RecordSink};
use crypto_history_exporter::resume::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crypto_history_exporter::{DataType, TimeWindow};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn trades_job(end: i64) -> FetchJob {
    FetchJob::new("binance_pm", "main", DataType::Trades, 0, end).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_windows_partition_the_requested_range() {
    let client = Arc::new(ScriptedExchange::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let job = trades_job(50 * HOUR);
    let (orchestrator, _shutdown) = orchestrator(client.clone(), store.clone(), settings());
    let mut sink = MemorySink::new();

    let report = orchestrator.run(&job, &mut sink).await;

    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.progress.windows_completed, 3);

    let requested: Vec<TimeWindow> = client.calls().iter().map(|c| c.window).collect();
    assert_eq!(
        requested,
        vec![
            TimeWindow::new(0, 24 * HOUR),
            TimeWindow::new(24 * HOUR, 48 * HOUR),
            TimeWindow::new(48 * HOUR, 50 * HOUR),
        ]
    );

    let checkpoint = store.load(&job).unwrap();
    let committed: Vec<TimeWindow> = checkpoint.completed().iter().map(|c| c.window).collect();
    assert_eq!(committed, requested);
    assert!(checkpoint.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_aborts_job_at_the_failing_window() {
    let client = Arc::new(
        ScriptedExchange::new()
            .script(0, None, vec![last_page(vec![trade(1, 1_000)])])
            .script(24 * HOUR, None, vec![Err(FetchError::Auth("invalid api key".into()))]),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let job = trades_job(72 * HOUR);
    let (orchestrator, _shutdown) = orchestrator(client.clone(), store.clone(), settings());
    let mut sink = MemorySink::new();

    let report = orchestrator.run(&job, &mut sink).await;

    match &report.outcome {
        JobOutcome::Aborted {
            cause,
            window,
            resume_from,
        } => {
            assert!(cause.contains("invalid api key"));
            assert_eq!(*window, Some(TimeWindow::new(24 * HOUR, 48 * HOUR)));
            assert_eq!(*resume_from, 24 * HOUR);
        }
        other => panic!("expected abort, got {other:?}"),
    }

    // No retries for rejected credentials, and the third window is never touched
    let calls = client.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.window.start < 48 * HOUR));

    assert_eq!(sink.records().len(), 1);
    assert_eq!(store.load(&job).unwrap().frontier(), 24 * HOUR);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_after_retried_page_is_emitted_once() {
    let client = Arc::new(
        ScriptedExchange::new()
            .script(0, None, vec![page(vec![trade(1, 100), trade(2, 200)], "2")])
            .script(
                0,
                Some("2"),
                vec![
                    Err(FetchError::TransientNetwork("connection reset".into())),
                    last_page(vec![trade(2, 200), trade(3, 300)]),
                ],
            ),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let job = trades_job(24 * HOUR);
    let (orchestrator, _shutdown) = orchestrator(client.clone(), store, settings());
    let mut sink = MemorySink::new();

    let report = orchestrator.run(&job, &mut sink).await;

    assert_eq!(report.outcome, JobOutcome::Completed);
    assert_eq!(report.progress.retries, 1);
    let ids: Vec<&str> = sink.records().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["BTCUSDT:1", "BTCUSDT:2", "BTCUSDT:3"]);

    // The retry repeated the identical request
    let calls = client.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1].state, calls[2].state);
}

#[tokio::test(start_paused = true)]
async fn test_emission_order_is_non_decreasing_across_pages_and_windows() {
    let client = Arc::new(
        ScriptedExchange::new()
            .script(
                0,
                None,
                vec![page(
                    // unordered, plus one record that belongs to the next window
                    vec![trade(3, 300), trade(1, 100), trade(99, 24 * HOUR + 5), trade(2, 200)],
                    "p2",
                )],
            )
            .script(0, Some("p2"), vec![last_page(vec![trade(5, 500), trade(4, 400)])])
            .script(
                24 * HOUR,
                None,
                vec![last_page(vec![trade(7, 24 * HOUR + 20), trade(6, 24 * HOUR + 10)])],
            ),
    );
    let job = trades_job(48 * HOUR);
    let (orchestrator, _shutdown) =
        orchestrator(client, Arc::new(MemoryCheckpointStore::new()), settings());
    let mut sink = MemorySink::new();

    let report = orchestrator.run(&job, &mut sink).await;
    assert_eq!(report.outcome, JobOutcome::Completed);

    let timestamps: Vec<i64> = sink.records().iter().map(|r| r.timestamp).collect();
    assert_eq!(
        timestamps,
        vec![100, 200, 300, 400, 500, 24 * HOUR + 10, 24 * HOUR + 20]
    );
    assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(sink.records().iter().all(|r| r.id != "BTCUSDT:99"));
}

/// Three windows; the second pages once before its final page
fn resumable_script(fail_mid_window: bool) -> ScriptedExchange {
    let mut second_page = Vec::new();
    if fail_mid_window {
        second_page.push(Err(FetchError::Auth("key revoked".into())));
    }
    second_page.push(last_page(vec![trade(5, 24 * HOUR + 200), trade(6, 24 * HOUR + 300)]));

    ScriptedExchange::new()
        .script(0, None, vec![page(vec![trade(1, 100), trade(2, 200)], "2")])
        .script(0, Some("2"), vec![last_page(vec![trade(3, 300)])])
        .script(24 * HOUR, None, vec![page(vec![trade(4, 24 * HOUR + 100)], "2")])
        .script(24 * HOUR, Some("2"), second_page)
        .script(48 * HOUR, None, vec![last_page(vec![trade(7, 48 * HOUR + 1)])])
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_then_resumed_export_matches_uninterrupted_run() {
    let job = trades_job(50 * HOUR);

    // Uninterrupted reference run
    let (reference, _shutdown) = orchestrator(
        Arc::new(resumable_script(false)),
        Arc::new(MemoryCheckpointStore::new()),
        settings(),
    );
    let mut reference_sink = MemorySink::new();
    assert_eq!(
        reference.run(&job, &mut reference_sink).await.outcome,
        JobOutcome::Completed
    );
    let expected: HashSet<String> = reference_sink.records().iter().map(|r| r.id.clone()).collect();
    assert_eq!(expected.len(), 7);

    let dir = tempfile::tempdir().unwrap();
    let resume_dir = dir.path().join("resume");
    let output = dir.path().join("trades.csv");

    // First run dies in the middle of the second window
    let (first, _shutdown) = orchestrator(
        Arc::new(resumable_script(true)),
        Arc::new(FileCheckpointStore::new(&resume_dir)),
        settings(),
    );
    let mut sink = CsvRecordSink::create(&output).unwrap();
    let report = first.run(&job, &mut sink).await;
    sink.close().unwrap();
    assert!(matches!(report.outcome, JobOutcome::Aborted { .. }));

    let checkpoint = FileCheckpointStore::new(&resume_dir).load(&job).unwrap();
    assert_eq!(checkpoint.frontier(), 24 * HOUR);
    let in_progress = checkpoint.in_progress().unwrap();
    assert_eq!(in_progress.window, TimeWindow::new(24 * HOUR, 48 * HOUR));
    assert_eq!(in_progress.pagination.cursor.as_deref(), Some("2"));

    // Second run picks up from the saved cursor
    let client = Arc::new(resumable_script(false));
    let (second, _shutdown) = orchestrator(
        client.clone(),
        Arc::new(FileCheckpointStore::new(&resume_dir)),
        settings(),
    );
    let mut sink = CsvRecordSink::open_append(&output).unwrap();
    let report = second.run(&job, &mut sink).await;
    sink.close().unwrap();
    assert_eq!(report.outcome, JobOutcome::Completed);

    let first_call = &client.calls()[0];
    assert_eq!(first_call.window.start, 24 * HOUR);
    assert_eq!(first_call.state.cursor.as_deref(), Some("2"));

    let written = crypto_history_exporter::output::csv::read_ids(&output).unwrap();
    assert_eq!(written, expected);
    let rows = ::csv::Reader::from_path(&output).unwrap().records().count();
    assert_eq!(rows, expected.len());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_retry_wait_cancels_at_committed_frontier() {
    let client = Arc::new(
        ScriptedExchange::new()
            .script(0, None, vec![last_page(vec![trade(1, 100)])])
            .script(
                24 * HOUR,
                None,
                vec![Err(FetchError::RateLimited {
                    retry_after: Some(Duration::from_secs(60)),
                    message: "too many requests".into(),
                })],
            ),
    );
    let store = Arc::new(MemoryCheckpointStore::new());
    let job = trades_job(48 * HOUR);
    let (orchestrator, shutdown) = orchestrator(client.clone(), store.clone(), settings());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        shutdown.request_shutdown();
    });

    let mut sink = MemorySink::new();
    let report = orchestrator.run(&job, &mut sink).await;

    assert_eq!(
        report.outcome,
        JobOutcome::Cancelled {
            resume_from: 24 * HOUR
        }
    );
    assert_eq!(client.calls().len(), 2);
    assert_eq!(store.load(&job).unwrap().frontier(), 24 * HOUR);
}
