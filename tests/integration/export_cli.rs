//! Integration tests for the export command that need no network access

use clap::Parser;
use crypto_history_exporter::cli::{Cli, Commands, ExportSummary};
use crypto_history_exporter::downloader::JobOutcome;
use crypto_history_exporter::shutdown::ShutdownCoordinator;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path.display().to_string()
}

async fn run_export(args: &[&str]) -> ExportSummary {
    let cli = Cli::try_parse_from(args).unwrap();
    let Commands::Export(export) = &cli.command else {
        panic!("expected export command");
    };
    export
        .execute(&cli, ShutdownCoordinator::shared())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_empty_range_completes_and_writes_header_only_files() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[exchanges.binance_pm]
accounts = [{ name = "main", api_key = "k", api_secret = "s" }]
"#,
    );
    let output = dir.path().join("out");
    let resume = dir.path().join("resume");

    let summary = run_export(&[
        "crypto-history-exporter",
        "--config",
        &config,
        "export",
        "-e",
        "binance_pm",
        "--data-types",
        "trades",
        "funding",
        "--start",
        "2024-01-01",
        "--end",
        "2024-01-01",
        "--output-dir",
        output.to_str().unwrap(),
        "--resume-dir",
        resume.to_str().unwrap(),
    ])
    .await;

    assert_eq!(summary.jobs.len(), 2);
    assert!(summary.failures.is_empty());
    assert!(summary
        .jobs
        .iter()
        .all(|report| report.outcome == JobOutcome::Completed));
    assert_eq!(summary.exit_code(), 0);

    let trades = output.join(
        "binance_pm/main/trades/binance_pm_main_trades_2024-01-01_2024-01-01.csv",
    );
    let contents = std::fs::read_to_string(trades).unwrap();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.starts_with("exchange,"));
}

#[tokio::test]
async fn test_disabled_exchange_is_a_setup_failure() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[exchanges.binance_pm]
enabled = false
accounts = [{ name = "main", api_key = "k", api_secret = "s" }]
"#,
    );

    let summary = run_export(&[
        "crypto-history-exporter",
        "--config",
        &config,
        "export",
        "-e",
        "binance_pm",
        "--data-types",
        "trades",
        "--start",
        "2024-01-01",
        "--end",
        "2024-01-02",
        "--output-dir",
        dir.path().join("out").to_str().unwrap(),
        "--resume",
        "off",
    ])
    .await;

    assert!(summary.jobs.is_empty());
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].exchange, "binance_pm");
    assert_eq!(summary.exit_code(), 2);
}

#[tokio::test]
async fn test_start_after_end_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "[exchanges.binance_pm]\naccounts = []\n");

    let cli = Cli::try_parse_from([
        "crypto-history-exporter",
        "--config",
        &config,
        "export",
        "-e",
        "binance_pm",
        "--data-types",
        "trades",
        "--start",
        "2024-02-01",
        "--end",
        "2024-01-01",
    ])
    .unwrap();
    let Commands::Export(export) = &cli.command else {
        panic!("expected export command");
    };

    assert!(export
        .execute(&cli, ShutdownCoordinator::shared())
        .await
        .is_err());
}
