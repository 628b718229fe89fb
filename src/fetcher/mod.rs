//! Exchange adapters, retry classification and pagination
//!
//! Every exchange is reached through the [`ExchangeClient`] trait. Adapters
//! report failures as a [`FetchError`], a closed set of kinds the
//! [`retry::RetryClassifier`] knows how to handle, so no upstream failure can
//! reach the orchestrator unclassified.

use crate::{DataType, TimeWindow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub mod binance_config;
pub mod binance_http;
pub mod binance_pm;
pub mod pagination;
pub mod retry;
pub mod shared_resources;

pub use pagination::{PageOutcome, PaginationDriver, WindowFailure};
pub use retry::{Disposition, RetryClassifier};

/// Tagged upstream failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Exchange rejected the call for exceeding its rate limit
    #[error("rate limited: {message}")]
    RateLimited {
        /// Exchange-supplied wait before retrying
        retry_after: Option<Duration>,
        /// Exchange message
        message: String,
    },

    /// Connection failure or timeout
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// 5xx response
    #[error("upstream server error (HTTP {status}): {message}")]
    UpstreamServer {
        /// HTTP status
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Body could not be decoded
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Credentials rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Request can never succeed as configured
    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

/// Result type for adapter operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Adapter-native record; the core only reads the timestamp and native id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Exchange-native id, if the data type has one
    pub native_id: Option<String>,
    /// Event time (ms)
    pub timestamp: i64,
    /// Original payload
    pub payload: serde_json::Value,
}

/// Per-window pagination cursor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationState {
    /// Opaque continuation token; `None` requests the first page
    pub cursor: Option<String>,
    /// Timestamp of the last record emitted from this window
    pub last_seen_timestamp: Option<i64>,
    /// Pages fetched in this window
    #[serde(default)]
    pub pages_fetched: u64,
    /// Records emitted from this window
    #[serde(default)]
    pub records_emitted: u64,
}

/// One page returned by an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Records in the page, in any order
    pub records: Vec<RawRecord>,
    /// Continuation token for the next page; `None` means the window is exhausted
    pub next_cursor: Option<String>,
    /// Weight the exchange charged for this call
    pub cost: u32,
    /// Weight already used in the exchange's current interval, if reported
    pub used_weight: Option<u32>,
}

impl Page {
    /// Terminal page with no records
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            next_cursor: None,
            cost: 0,
            used_weight: None,
        }
    }
}

/// Exchange adapter
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Exchange name used in job ids and output paths
    fn exchange(&self) -> &str;

    /// Whether the adapter can export `data_type`
    fn supports(&self, data_type: DataType) -> bool;

    /// Estimated weight of one page request, debited before the call
    fn request_weight(&self, data_type: DataType) -> u32;

    /// Fetch one page of `window` continuing from `state`.
    ///
    /// Records must come back in ascending time order across pages.
    async fn fetch_page(
        &self,
        data_type: DataType,
        window: &TimeWindow,
        state: &PaginationState,
    ) -> FetchResult<Page>;
}

/// API credentials passed through to an adapter
#[derive(Clone, Default)]
pub struct Credentials {
    /// API key
    pub api_key: String,
    /// API secret
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &binance_http::redact(&self.api_key))
            .field("api_secret", &"***")
            .finish()
    }
}

/// Create an adapter for `exchange`
pub fn create_client(
    exchange: &str,
    credentials: &Credentials,
) -> FetchResult<Arc<dyn ExchangeClient>> {
    match exchange {
        binance_pm::EXCHANGE_NAME => Ok(Arc::new(binance_pm::BinancePmClient::new(
            &credentials.api_key,
            &credentials.api_secret,
        ))),
        other => Err(FetchError::FatalConfig(format!("unsupported exchange: {other}"))),
    }
}
