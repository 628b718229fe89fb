//! # Crypto History Exporter Library
//!
//! Resumable export of historical account records (fills, funding, transfers,
//! interest) from cryptocurrency exchanges whose APIs impose pagination,
//! time-range limits and request-rate quotas.
//!
//! ## Features
//!
//! - **Gap-free exports**: requested ranges are sliced into exchange-legal windows
//!   and every window is paged until the exchange signals exhaustion
//! - **Resume Capability**: durable per-job checkpoints of completed windows and
//!   in-progress pagination cursors
//! - **Rate Limiting**: fixed-interval request/weight budgets shared per account
//! - **Retry Classification**: typed upstream failures mapped to retry, window
//!   abort or job abort
//! - **Normalization**: one canonical record schema across exchanges with exact
//!   decimal strings
//!
//! ## Quick Start
//!
//! ```no_run
//! use crypto_history_exporter::downloader::{FetchJob, FetchOrchestrator, JobSettings};
//! use crypto_history_exporter::fetcher::binance_pm::BinancePmClient;
//! use crypto_history_exporter::output::csv::CsvRecordSink;
//! use crypto_history_exporter::resume::MemoryCheckpointStore;
//! use crypto_history_exporter::DataType;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let job = FetchJob::new("binance_pm", "main", DataType::Trades, 1704067200000, 1704240000000)?;
//! let client = Arc::new(BinancePmClient::new("key", "secret"));
//! let settings = JobSettings::default();
//! let orchestrator = FetchOrchestrator::new(client, Arc::new(MemoryCheckpointStore::new()), settings);
//! let mut sink = CsvRecordSink::create("./output/trades.csv")?;
//! let report = orchestrator.run(&job, &mut sink).await;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`downloader`] - Job model, window planning, rate governance and orchestration
//! - [`fetcher`] - Exchange adapters, retry classification and pagination
//! - [`normalizer`] - Mapping of exchange-native records into [`NormalizedRecord`]
//! - [`resume`] - Checkpoint persistence for crash-safe resumption
//! - [`output`] - Record sinks (CSV) and output path layout
//! - [`registry`] - Supported exchanges and their limits
//! - [`config`] - TOML configuration file

#![warn(missing_docs)]
#![warn(clippy::all)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Configuration file loading
pub mod config;

/// Fetch orchestration
pub mod downloader;

/// Exchange adapters and pagination
pub mod fetcher;

/// Metrics instrumentation
pub mod metrics;

/// Canonical record normalization
pub mod normalizer;

/// Record sinks
pub mod output;

/// Exchange registry with limits and capabilities
pub mod registry;

/// Checkpointing for fetch jobs
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Kind of account history being exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Trade fills
    Trades,
    /// Funding fee payments
    Funding,
    /// Deposits
    Deposits,
    /// Withdrawals
    Withdrawals,
    /// Margin interest charges
    Interest,
}

impl DataType {
    /// All data types, in export order
    pub const ALL: [DataType; 5] = [
        DataType::Trades,
        DataType::Funding,
        DataType::Deposits,
        DataType::Withdrawals,
        DataType::Interest,
    ];

    /// Canonical lowercase name used in paths and job ids
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Trades => "trades",
            DataType::Funding => "funding",
            DataType::Deposits => "deposits",
            DataType::Withdrawals => "withdrawals",
            DataType::Interest => "interest",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trades" => Ok(DataType::Trades),
            "funding" => Ok(DataType::Funding),
            "deposits" => Ok(DataType::Deposits),
            "withdrawals" => Ok(DataType::Withdrawals),
            "interest" => Ok(DataType::Interest),
            _ => Err(format!("Invalid data type: {s}")),
        }
    }
}

/// Canonical direction of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Buy fill
    Buy,
    /// Sell fill
    Sell,
    /// Incoming transfer
    Deposit,
    /// Outgoing transfer
    Withdrawal,
    /// No direction (fees, interest)
    None,
}

impl Side {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
            Side::Deposit => "deposit",
            Side::Withdrawal => "withdrawal",
            Side::None => "none",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical record type, mapped from the exchange's own type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Trade fill
    Trade,
    /// Funding fee settlement
    FundingFee,
    /// Deposit
    Deposit,
    /// Withdrawal
    Withdrawal,
    /// Interest charge
    Interest,
}

impl RecordType {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Trade => "trade",
            RecordType::FundingFee => "funding_fee",
            RecordType::Deposit => "deposit",
            RecordType::Withdrawal => "withdrawal",
            RecordType::Interest => "interest",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open time range `[start, end)` in UTC milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start (ms)
    pub start: i64,
    /// Exclusive end (ms)
    pub end: i64,
}

impl TimeWindow {
    /// Create a window
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Span of the window in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Whether `timestamp` falls inside the half-open range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Whether the window covers no time at all
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Canonical cross-exchange record.
///
/// `(exchange, data_type, id)` is unique across an export and `datetime` is
/// always derived from `timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedRecord {
    /// Exchange name (e.g. "binance_pm")
    pub exchange: String,
    /// Account name from configuration
    pub account: String,
    /// Data type the record was exported under
    pub data_type: DataType,
    /// Stable unique key per exchange and data type
    pub id: String,
    /// Event time (Unix timestamp in milliseconds, UTC)
    pub timestamp: i64,
    /// ISO-8601 UTC rendering of `timestamp` with millisecond precision
    pub datetime: String,
    /// Instrument or asset symbol
    pub symbol: Option<String>,
    /// Canonical direction
    pub side: Side,
    /// Execution price
    pub price: Option<Decimal>,
    /// Quantity or amount
    pub quantity: Option<Decimal>,
    /// Fee charged
    pub fee: Option<Decimal>,
    /// Fee asset
    pub fee_currency: Option<String>,
    /// Canonical record type
    pub raw_type: RecordType,
    /// Exchange-specific fields
    pub extra: BTreeMap<String, String>,
}

impl NormalizedRecord {
    /// Validate record integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Record id must not be empty".to_string());
        }

        if self.timestamp < 0 {
            return Err(format!(
                "Timestamp must be non-negative, got {}",
                self.timestamp
            ));
        }

        if let Some(quantity) = self.quantity {
            if quantity < Decimal::ZERO && self.data_type == DataType::Trades {
                return Err(format!("Trade quantity must be non-negative, got {quantity}"));
            }
        }

        Ok(())
    }
}
