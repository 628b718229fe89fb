//! Unit tests for window planning over many ranges and checkpoints

use crypto_history_exporter::downloader::{FetchJob, TimeRangePlanner};
use crypto_history_exporter::fetcher::PaginationState;
use crypto_history_exporter::resume::Checkpoint;
use crypto_history_exporter::{DataType, TimeWindow};

const HOUR: i64 = 3_600_000;

fn job(start: i64, end: i64) -> FetchJob {
    FetchJob::new("binance_pm", "main", DataType::Interest, start, end).unwrap()
}

/// Windows must be non-empty, contiguous, within the span and cover `[from, end)`
fn assert_partition(windows: &[TimeWindow], from: i64, end: i64, max_span: i64) {
    if from >= end {
        assert!(windows.is_empty());
        return;
    }
    assert_eq!(windows.first().unwrap().start, from);
    assert_eq!(windows.last().unwrap().end, end);
    for window in windows {
        assert!(!window.is_empty());
        assert!(window.duration_ms() <= max_span);
    }
    for pair in windows.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}

#[test]
fn test_plans_partition_many_ranges() {
    let spans = [1, 7, HOUR, 24 * HOUR, 720 * HOUR];
    let ranges = [
        (0, 0),
        (0, 1),
        (1_704_067_200_000, 1_704_067_200_001),
        (1_704_067_200_000, 1_704_067_200_000 + 50 * HOUR),
        (1_704_067_200_000, 1_704_067_200_000 + 24 * HOUR),
        (1_704_067_200_000, 1_706_745_600_000),
        (5, 5 + 3 * HOUR + 17),
    ];

    for max_span in spans {
        let planner = TimeRangePlanner::new(max_span).unwrap();
        for (start, end) in ranges {
            // skip plans that would be millions of windows long
            if (end - start) / max_span > 100_000 {
                continue;
            }
            let job = job(start, end);
            let windows = planner.plan(&job, &Checkpoint::new(&job));
            assert_partition(&windows, start, end, max_span);
        }
    }
}

#[test]
fn test_fifty_hours_in_day_windows() {
    let planner = TimeRangePlanner::new(24 * HOUR).unwrap();
    let job = job(0, 50 * HOUR);
    let windows = planner.plan(&job, &Checkpoint::new(&job));
    assert_eq!(
        windows,
        vec![
            TimeWindow::new(0, 24 * HOUR),
            TimeWindow::new(24 * HOUR, 48 * HOUR),
            TimeWindow::new(48 * HOUR, 50 * HOUR),
        ]
    );
}

#[test]
fn test_plan_resumes_after_completed_prefix() {
    let planner = TimeRangePlanner::new(10 * HOUR).unwrap();
    let job = job(0, 35 * HOUR);
    let mut checkpoint = Checkpoint::new(&job);
    checkpoint.record_window(TimeWindow::new(0, 10 * HOUR), 4).unwrap();
    checkpoint.record_window(TimeWindow::new(10 * HOUR, 20 * HOUR), 0).unwrap();

    let windows = planner.plan(&job, &checkpoint);
    assert_partition(&windows, 20 * HOUR, 35 * HOUR, 10 * HOUR);
    assert_eq!(windows.len(), 2);
}

#[test]
fn test_in_progress_window_keeps_its_bounds_when_span_shrinks() {
    let job = job(0, 48 * HOUR);
    let mut checkpoint = Checkpoint::new(&job);
    let interrupted = TimeWindow::new(0, 24 * HOUR);
    checkpoint
        .record_page(
            interrupted,
            PaginationState {
                cursor: Some("3".to_string()),
                last_seen_timestamp: Some(HOUR),
                pages_fetched: 2,
                records_emitted: 200,
            },
        )
        .unwrap();

    let planner = TimeRangePlanner::new(6 * HOUR).unwrap();
    let windows = planner.plan(&job, &checkpoint);

    assert_eq!(windows[0], interrupted);
    assert_partition(&windows[1..], 24 * HOUR, 48 * HOUR, 6 * HOUR);
}

#[test]
fn test_complete_checkpoint_plans_nothing() {
    let planner = TimeRangePlanner::new(24 * HOUR).unwrap();
    let job = job(0, 24 * HOUR);
    let mut checkpoint = Checkpoint::new(&job);
    checkpoint.record_window(TimeWindow::new(0, 24 * HOUR), 9).unwrap();

    assert!(planner.plan(&job, &checkpoint).is_empty());
}

#[test]
fn test_non_positive_span_is_rejected() {
    assert!(TimeRangePlanner::new(0).is_err());
    assert!(TimeRangePlanner::new(-HOUR).is_err());
}
