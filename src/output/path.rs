//! Output path generation
//!
//! Every job writes one file:
//! `{root}/{exchange}/{account}/{data_type}/{exchange}_{account}_{data_type}_{startDate}_{endDate}.csv`
//! with dates rendered as `YYYY-MM-DD` in UTC.
//!
//! # Usage Example
//!
//! ```rust
//! use crypto_history_exporter::output::OutputPathBuilder;
//! use crypto_history_exporter::DataType;
//! use std::path::PathBuf;
//!
//! let path = OutputPathBuilder::new(PathBuf::from("output"), "binance_pm", "main")
//!     .with_data_type(DataType::Trades)
//!     .with_range(1704067200000, 1706745600000)
//!     .build()
//!     .unwrap();
//! assert_eq!(
//!     path,
//!     PathBuf::from("output/binance_pm/main/trades/binance_pm_main_trades_2024-01-01_2024-02-01.csv")
//! );
//! ```

use super::{OutputError, OutputResult};
use crate::downloader::{check_name, FetchJob};
use crate::DataType;
use chrono::DateTime;
use std::path::PathBuf;

/// Path builder for per-job export files
#[derive(Debug, Clone)]
pub struct OutputPathBuilder {
    root_dir: PathBuf,
    exchange: String,
    account: String,
    data_type: DataType,
    range: Option<(i64, i64)>,
}

impl OutputPathBuilder {
    /// Create a new path builder
    ///
    /// # Arguments
    ///
    /// * `root_dir` - Output root (e.g., "./output")
    /// * `exchange` - Exchange name (e.g., "binance_pm")
    /// * `account` - Account name from configuration
    pub fn new(root_dir: PathBuf, exchange: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            root_dir,
            exchange: exchange.into(),
            account: account.into(),
            data_type: DataType::Trades,
            range: None,
        }
    }

    /// Builder preset for `job`
    pub fn for_job(root_dir: PathBuf, job: &FetchJob) -> Self {
        Self::new(root_dir, job.exchange(), job.account())
            .with_data_type(job.data_type())
            .with_range(job.start(), job.end())
    }

    /// Set the data type (default: trades)
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Set the requested range in milliseconds
    pub fn with_range(mut self, start: i64, end: i64) -> Self {
        self.range = Some((start, end));
        self
    }

    /// Directory holding the file
    pub fn directory(&self) -> OutputResult<PathBuf> {
        self.check_names()?;
        Ok(self
            .root_dir
            .join(&self.exchange)
            .join(&self.account)
            .join(self.data_type.as_str()))
    }

    /// File name without directory
    pub fn filename(&self) -> OutputResult<String> {
        self.check_names()?;
        let (start, end) = self
            .range
            .ok_or_else(|| OutputError::IoError("output range not set".to_string()))?;
        Ok(format!(
            "{}_{}_{}_{}_{}.csv",
            self.exchange,
            self.account,
            self.data_type,
            format_date(start)?,
            format_date(end)?
        ))
    }

    /// Full path
    pub fn build(&self) -> OutputResult<PathBuf> {
        Ok(self.directory()?.join(self.filename()?))
    }

    // Names become path components and must not climb out of the root
    fn check_names(&self) -> OutputResult<()> {
        check_name("exchange", &self.exchange)
            .and_then(|_| check_name("account", &self.account))
            .map_err(|e| OutputError::InvalidName(e.to_string()))
    }
}

/// `YYYY-MM-DD` of a millisecond timestamp in UTC
pub fn format_date(timestamp_ms: i64) -> OutputResult<String> {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .ok_or(OutputError::InvalidTimestamp(timestamp_ms))
}
