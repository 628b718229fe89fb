//! Export command implementation

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::downloader::{FetchJob, FetchOrchestrator, JobOutcome, JobReport, JobSettings};
use crate::fetcher::{create_client, ExchangeClient};
use crate::output::{CsvRecordSink, OutputPathBuilder, OutputResult, RecordSink};
use crate::registry::ExchangeRegistry;
use crate::resume::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::shutdown::SharedShutdown;
use crate::{DataType, NormalizedRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::CliError;

/// Maximum allowed concurrency to prevent self-inflicted rate limiting
const MAX_CONCURRENCY: usize = 32;

/// Parse a UTC time from `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339.
///
/// Inputs without a timezone are taken as UTC; a bare date means midnight.
/// Returns milliseconds since the epoch.
pub fn parse_time(input: &str) -> Result<i64, CliError> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc().timestamp_millis());
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid time '{input}': {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument(format!("Invalid time '{input}'")))?;
    Ok(datetime.and_utc().timestamp_millis())
}

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Resume modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Ignore and do not write checkpoints; output files are rewritten
    Off,
    /// Resume from checkpoints if available
    On,
    /// Clear the checkpoints of the requested jobs and start fresh
    Reset,
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(ResumeMode::Off),
            "on" => Ok(ResumeMode::On),
            "reset" => Ok(ResumeMode::Reset),
            _ => Err(format!("Invalid resume mode: {s}. Valid options: on, off, reset")),
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Crypto History Exporter CLI
#[derive(Parser, Debug)]
#[command(name = "crypto-history-exporter")]
#[command(about = "Export account history from cryptocurrency exchanges", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export history to CSV
    Export(ExportArgs),

    /// List supported exchanges and data types
    Sources(super::SourcesCommand),

    /// Validate the config file or checkpoints
    Validate(super::ValidateCommand),
}

/// Export command arguments
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// One or more exchanges (e.g. binance_pm)
    #[arg(long = "exchange", short = 'e', required = true, num_args = 1..)]
    pub exchanges: Vec<String>,

    /// Only export these accounts
    #[arg(long, num_args = 1..)]
    pub accounts: Vec<String>,

    /// Data types to export
    #[arg(long, required = true, num_args = 1.., value_parser = parse_data_type)]
    pub data_types: Vec<DataType>,

    /// Start time (YYYY-MM-DD or RFC 3339, UTC, inclusive)
    #[arg(long)]
    pub start: String,

    /// End time (YYYY-MM-DD or RFC 3339, UTC, exclusive)
    #[arg(long)]
    pub end: String,

    /// Output root directory (default: from config)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Resume mode: on, off or reset
    #[arg(long, default_value = "on")]
    pub resume: ResumeMode,

    /// Checkpoint directory (default: from config)
    #[arg(long)]
    pub resume_dir: Option<PathBuf>,

    /// Number of jobs run at the same time (default: from config, max: 32)
    ///
    /// Jobs on the same account share one rate budget, so more concurrency
    /// mostly helps when several accounts or exchanges are exported.
    #[arg(long, value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long)]
    pub metrics_addr: Option<String>,
}

fn parse_data_type(s: &str) -> Result<DataType, String> {
    DataType::from_str(s)
}

/// A job that could not be set up
#[derive(Debug, Clone, Serialize)]
pub struct SetupFailure {
    /// Exchange name
    pub exchange: String,
    /// Account name, if the failure is account-specific
    pub account: Option<String>,
    /// Data type, if the failure is data-type-specific
    pub data_type: Option<DataType>,
    /// What went wrong
    pub error: String,
}

/// Result of an export run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportSummary {
    /// Reports of the jobs that ran
    pub jobs: Vec<JobReport>,
    /// Jobs that never started
    pub failures: Vec<SetupFailure>,
}

impl ExportSummary {
    /// Jobs that completed every window
    pub fn completed(&self) -> usize {
        self.jobs.iter().filter(|r| r.outcome.is_completed()).count()
    }

    /// Jobs attempted, including those that failed to start
    pub fn total(&self) -> usize {
        self.jobs.len() + self.failures.len()
    }

    /// 0 when every job completed, 2 when none did, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        let completed = self.completed();
        if completed == self.total() {
            0
        } else if completed == 0 {
            2
        } else {
            1
        }
    }
}

/// One job ready to run
struct PlannedJob {
    job: FetchJob,
    client: Arc<dyn ExchangeClient>,
    settings: JobSettings,
    output_path: PathBuf,
}

impl ExportArgs {
    /// Run the export and return its summary
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<ExportSummary, CliError> {
        let start = parse_time(&self.start)?;
        let end = parse_time(&self.end)?;
        if start > end {
            return Err(CliError::InvalidArgument(format!(
                "start ({}) is after end ({})",
                self.start, self.end
            )));
        }

        let config = Config::from_file(&cli.config)?;
        let output_dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| config.global.output_dir.clone());
        let resume_dir = self
            .resume_dir
            .clone()
            .unwrap_or_else(|| config.global.resume_dir.clone());
        let concurrency = self.concurrency.unwrap_or(config.global.concurrency).max(1);

        if let Some(addr) = self.metrics_addr.as_ref().or(config.global.metrics_addr.as_ref()) {
            let addr = addr
                .parse()
                .map_err(|e| CliError::InvalidArgument(format!("Invalid metrics address {addr}: {e}")))?;
            if let Err(e) = crate::metrics::init_metrics(addr).await {
                warn!(error = %e, "Failed to start metrics exporter, continuing without it");
            }
        }

        let (planned, failures) = self.plan_jobs(&config, start, end, &output_dir);
        let mut summary = ExportSummary {
            jobs: Vec::new(),
            failures,
        };

        let store: Arc<dyn CheckpointStore> = match self.resume {
            ResumeMode::Off => Arc::new(MemoryCheckpointStore::new()),
            ResumeMode::On | ResumeMode::Reset => Arc::new(FileCheckpointStore::new(&resume_dir)),
        };
        if self.resume == ResumeMode::Reset {
            for planned in &planned {
                store.clear(&planned.job)?;
            }
            info!(resume_dir = %resume_dir.display(), jobs = planned.len(), "Cleared checkpoints");
        }

        info!(
            jobs = planned.len(),
            concurrency,
            start,
            end,
            "Starting export"
        );

        let bars = MultiProgress::new();
        let append = self.resume == ResumeMode::On;
        summary.jobs = stream::iter(planned)
            .map(|planned| {
                let store = store.clone();
                let shutdown = shutdown.clone();
                let bar = bars.add(create_progress_bar(&planned.job));
                async move { run_job(planned, store, shutdown, append, bar).await }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        summary.jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));

        match cli.output_format {
            OutputFormat::Json => output_json(&summary),
            OutputFormat::Human => output_human(&summary),
        }

        Ok(summary)
    }

    /// One job per (exchange, account, data type); setup problems are
    /// collected instead of stopping the run
    fn plan_jobs(
        &self,
        config: &Config,
        start: i64,
        end: i64,
        output_dir: &std::path::Path,
    ) -> (Vec<PlannedJob>, Vec<SetupFailure>) {
        let mut planned = Vec::new();
        let mut failures = Vec::new();
        let registry = ExchangeRegistry::load().ok();

        for exchange in &self.exchanges {
            let fail = |account: Option<&str>, data_type: Option<DataType>, error: String| {
                error!(exchange = %exchange, account = ?account, data_type = ?data_type, "{error}");
                SetupFailure {
                    exchange: exchange.clone(),
                    account: account.map(str::to_string),
                    data_type,
                    error,
                }
            };

            let accounts = match config.accounts(exchange, &self.accounts) {
                Ok(accounts) if accounts.is_empty() => {
                    warn!(exchange = %exchange, "No matching accounts, skipping exchange");
                    continue;
                }
                Ok(accounts) => accounts,
                Err(e) => {
                    failures.push(fail(None, None, e.to_string()));
                    continue;
                }
            };

            for account in accounts {
                let client = match create_client(exchange, &account.credentials()) {
                    Ok(client) => client,
                    Err(e) => {
                        failures.push(fail(Some(&account.name), None, e.to_string()));
                        continue;
                    }
                };

                for &data_type in &self.data_types {
                    if let Some(registry) = registry {
                        if let Err(e) = registry.validate(exchange, data_type) {
                            failures.push(fail(Some(&account.name), Some(data_type), e.to_string()));
                            continue;
                        }
                    }
                    let settings = match config.job_settings(exchange, data_type) {
                        Ok(settings) => settings,
                        Err(e) => {
                            failures.push(fail(Some(&account.name), Some(data_type), e.to_string()));
                            continue;
                        }
                    };
                    let job = match FetchJob::new(exchange.as_str(), account.name.as_str(), data_type, start, end) {
                        Ok(job) => job,
                        Err(e) => {
                            failures.push(fail(Some(&account.name), Some(data_type), e.to_string()));
                            continue;
                        }
                    };
                    let output_path = match OutputPathBuilder::for_job(output_dir.to_path_buf(), &job).build() {
                        Ok(path) => path,
                        Err(e) => {
                            failures.push(fail(Some(&account.name), Some(data_type), e.to_string()));
                            continue;
                        }
                    };

                    planned.push(PlannedJob {
                        job,
                        client: client.clone(),
                        settings,
                        output_path,
                    });
                }
            }
        }

        (planned, failures)
    }
}

async fn run_job(
    planned: PlannedJob,
    store: Arc<dyn CheckpointStore>,
    shutdown: SharedShutdown,
    append: bool,
    bar: ProgressBar,
) -> JobReport {
    let PlannedJob {
        job,
        client,
        settings,
        output_path,
    } = planned;

    let opened = if append {
        CsvRecordSink::open_append(&output_path)
    } else {
        CsvRecordSink::create(&output_path)
    };
    let sink = match opened {
        Ok(sink) => sink,
        Err(e) => {
            bar.abandon_with_message(format!("{job}: cannot open output"));
            let report = JobReport::new(
                &job,
                JobOutcome::Aborted {
                    cause: format!("cannot open {}: {e}", output_path.display()),
                    window: None,
                    resume_from: job.start(),
                },
            );
            crate::metrics::JobMetrics::start(&job).record_outcome(&report.outcome);
            return report;
        }
    };

    let orchestrator = FetchOrchestrator::new(client, store, settings).with_shutdown(shutdown);
    let mut sink = ProgressSink { inner: sink, bar };
    let mut report = orchestrator.run(&job, &mut sink).await;

    if let Err(e) = sink.close() {
        error!(job_id = %job.job_id(), error = %e, "Failed to close output");
        if report.outcome.is_completed() {
            report.outcome = JobOutcome::Aborted {
                cause: format!("failed to close {}: {e}", output_path.display()),
                window: None,
                resume_from: job.start(),
            };
        }
    }
    sink.bar
        .finish_with_message(format!("{job}: {}", report.outcome.label()));
    report
}

/// Sink wrapper that advances a progress bar for every written record
struct ProgressSink<S> {
    inner: S,
    bar: ProgressBar,
}

impl<S: RecordSink> RecordSink for ProgressSink<S> {
    fn write(&mut self, record: &NormalizedRecord) -> OutputResult<bool> {
        let written = self.inner.write(record)?;
        if written {
            self.bar.inc(1);
        }
        Ok(written)
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.inner.flush()
    }

    fn close(&mut self) -> OutputResult<()> {
        self.inner.close()
    }
}

// ─── Progress bar ────────────────────────────────────────────────────────────

/// Spinner counting exported records; totals are unknown up front
fn create_progress_bar(job: &FetchJob) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} records {msg}")
            .expect("hardcoded template is valid"),
    );
    pb.set_message(job.to_string());
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

// ─── Summary output ──────────────────────────────────────────────────────────

/// Output the summary as JSON
fn output_json(summary: &ExportSummary) {
    let output = serde_json::json!({
        "exit_code": summary.exit_code(),
        "completed": summary.completed(),
        "total": summary.total(),
        "jobs": summary.jobs,
        "failures": summary.failures,
    });
    match serde_json::to_string(&output) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "Failed to serialize summary"),
    }
}

/// Output the summary in human-readable form
fn output_human(summary: &ExportSummary) {
    println!("\n{}", "=".repeat(50));
    println!("Export results: {}/{} jobs completed", summary.completed(), summary.total());
    println!("{}", "=".repeat(50));

    let (done, not_done): (Vec<_>, Vec<_>) =
        summary.jobs.iter().partition(|r| r.outcome.is_completed());

    if !done.is_empty() {
        println!("Completed:");
        for report in done {
            println!("  - {}", report.summary());
        }
    }
    if !not_done.is_empty() || !summary.failures.is_empty() {
        println!("Not completed:");
        for report in not_done {
            println!("  - {}", report.summary());
        }
        for failure in &summary.failures {
            let mut target = failure.exchange.clone();
            if let Some(account) = &failure.account {
                target.push_str(&format!("::{account}"));
            }
            if let Some(data_type) = failure.data_type {
                target.push_str(&format!("::{data_type}"));
            }
            println!("  - {target}: {}", failure.error);
        }
    }
}
