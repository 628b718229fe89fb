//! Binance Portfolio Margin endpoint configuration
//!
//! Every exportable data type maps to one [`EndpointConfig`], so differences
//! between the PAPI and SAPI hosts are configuration rather than code.
//!
//! # Hosts
//!
//! - **PAPI**: <https://papi.binance.com>, portfolio margin trades, funding and interest
//! - **SAPI**: <https://api.binance.com>, wallet deposits and withdrawals

use crate::DataType;

/// Portfolio margin API host
pub const PAPI_BASE_URL: &str = "https://papi.binance.com";

/// Wallet API host
pub const SAPI_BASE_URL: &str = "https://api.binance.com";

/// Records requested per paged call
pub const PAGE_LIMIT: u32 = 100;

/// Records requested per call for endpoints that cannot be paged in time order
pub const WALLET_HISTORY_LIMIT: u32 = 1000;

/// `recvWindow` sent with every signed request (ms)
pub const RECV_WINDOW_MS: u64 = 5000;

/// How a response body wraps its records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEnvelope {
    /// Top-level JSON array
    Array,
    /// Object with the records under `data`
    DataField,
}

/// How consecutive pages of one window are requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
    /// 1-based page number in `page_param`, records oldest first
    PageNumber,
    /// Whole window in one call; the endpoint returns newest first, so a
    /// full response cannot be continued in time order
    SingleShot,
}

/// Where a record's event time lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    /// Integer milliseconds
    Millis(&'static str),
    /// `YYYY-MM-DD HH:MM:SS` in UTC
    DateTime(&'static str),
}

/// Request and response shape of one data type
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Host, e.g. <https://papi.binance.com>
    pub base_url: &'static str,
    /// Path, e.g. `/papi/v1/pm/trade`
    pub path: &'static str,
    /// Rate limit weight of one call
    pub weight: u32,
    /// Paging mode
    pub paging: PagingMode,
    /// Page number parameter name
    pub page_param: &'static str,
    /// Page size parameter name
    pub limit_param: &'static str,
    /// Page size
    pub limit: u32,
    /// Response body shape
    pub envelope: ResponseEnvelope,
    /// Event time field
    pub timestamp_field: TimestampField,
    /// Native id field, if records carry a stable one
    pub id_field: Option<&'static str>,
}

/// Portfolio margin trade fills
pub const TRADES_ENDPOINT: EndpointConfig = EndpointConfig {
    base_url: PAPI_BASE_URL,
    path: "/papi/v1/pm/trade",
    weight: 5,
    paging: PagingMode::PageNumber,
    page_param: "page",
    limit_param: "limit",
    limit: PAGE_LIMIT,
    envelope: ResponseEnvelope::DataField,
    timestamp_field: TimestampField::Millis("time"),
    id_field: Some("id"),
};

/// Funding fee settlements
pub const FUNDING_ENDPOINT: EndpointConfig = EndpointConfig {
    base_url: PAPI_BASE_URL,
    path: "/papi/v1/pm/funding",
    weight: 30,
    paging: PagingMode::PageNumber,
    page_param: "page",
    limit_param: "limit",
    limit: PAGE_LIMIT,
    envelope: ResponseEnvelope::DataField,
    timestamp_field: TimestampField::Millis("time"),
    id_field: None,
};

/// Margin interest charges
pub const INTEREST_ENDPOINT: EndpointConfig = EndpointConfig {
    base_url: PAPI_BASE_URL,
    path: "/papi/v1/portfolio/interest-history",
    weight: 50,
    paging: PagingMode::PageNumber,
    page_param: "current",
    limit_param: "size",
    limit: PAGE_LIMIT,
    envelope: ResponseEnvelope::Array,
    timestamp_field: TimestampField::Millis("interestAccuredTime"),
    id_field: None,
};

/// Wallet deposits
pub const DEPOSITS_ENDPOINT: EndpointConfig = EndpointConfig {
    base_url: SAPI_BASE_URL,
    path: "/sapi/v1/capital/deposit/hisrec",
    weight: 1,
    paging: PagingMode::SingleShot,
    page_param: "offset",
    limit_param: "limit",
    limit: WALLET_HISTORY_LIMIT,
    envelope: ResponseEnvelope::Array,
    timestamp_field: TimestampField::Millis("insertTime"),
    id_field: Some("id"),
};

/// Wallet withdrawals
pub const WITHDRAWALS_ENDPOINT: EndpointConfig = EndpointConfig {
    base_url: SAPI_BASE_URL,
    path: "/sapi/v1/capital/withdraw/history",
    weight: 1,
    paging: PagingMode::SingleShot,
    page_param: "offset",
    limit_param: "limit",
    limit: WALLET_HISTORY_LIMIT,
    envelope: ResponseEnvelope::Array,
    timestamp_field: TimestampField::DateTime("applyTime"),
    id_field: Some("id"),
};

/// Endpoint for `data_type`
pub fn endpoint(data_type: DataType) -> &'static EndpointConfig {
    match data_type {
        DataType::Trades => &TRADES_ENDPOINT,
        DataType::Funding => &FUNDING_ENDPOINT,
        DataType::Deposits => &DEPOSITS_ENDPOINT,
        DataType::Withdrawals => &WITHDRAWALS_ENDPOINT,
        DataType::Interest => &INTEREST_ENDPOINT,
    }
}
