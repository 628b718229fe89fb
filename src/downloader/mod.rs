//! Fetch orchestration and rate governance
//!
//! This module provides the job model and the engine that runs a job to
//! completion, resuming from its checkpoint when one exists.
//!
//! # Overview
//!
//! 1. **Job Creation**: Describe what to export using [`job::FetchJob`]
//! 2. **Planning**: Slice the uncompleted range into windows with [`planner::TimeRangePlanner`]
//! 3. **Rate Limiting**: Shared per-account budgets via [`rate_limit::RateGovernor`]
//! 4. **Execution**: Drain every window with [`executor::FetchOrchestrator`]
//! 5. **Reporting**: Outcome and counters in [`job::JobReport`]
//!
//! # Quick Start
//!
//! ```no_run
//! use crypto_history_exporter::downloader::{FetchJob, FetchOrchestrator, JobSettings};
//! use crypto_history_exporter::fetcher::binance_pm::BinancePmClient;
//! use crypto_history_exporter::output::MemorySink;
//! use crypto_history_exporter::resume::FileCheckpointStore;
//! use crypto_history_exporter::DataType;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let job = FetchJob::new("binance_pm", "main", DataType::Funding, 1640995200000, 1672531200000)?;
//! let orchestrator = FetchOrchestrator::new(
//!     Arc::new(BinancePmClient::new("key", "secret")),
//!     Arc::new(FileCheckpointStore::new("./.resume")),
//!     JobSettings::default(),
//! );
//!
//! let mut sink = MemorySink::new();
//! let report = orchestrator.run(&job, &mut sink).await;
//! println!("{} ({} records buffered)", report.summary(), sink.records().len());
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`executor`] - Job orchestration with checkpointing
//! - [`job`] - Job identity, outcome and progress counters
//! - [`planner`] - Window planning
//! - [`progress`] - Periodic progress logging
//! - [`rate_limit`] - Shared rate governance
//! - [`config`] - Job settings and default limits

pub mod config;
pub mod executor;
pub mod job;
pub mod planner;
pub mod progress;
pub mod rate_limit;

pub use config::{JobSettings, RateLimitSettings, RetryPolicy};
pub use executor::FetchOrchestrator;
pub use job::{check_name, FailedWindow, FetchJob, JobError, JobOutcome, JobProgress, JobReport};
pub use planner::TimeRangePlanner;
pub use progress::{ProgressState, ProgressTracker};
pub use rate_limit::{GovernorRegistry, RateGovernor, RateLimitError};
