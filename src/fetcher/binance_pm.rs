//! Binance Portfolio Margin adapter
//!
//! Maps each [`DataType`] onto its PAPI or SAPI endpoint (see
//! [`binance_config`](super::binance_config)) and turns response bodies into
//! [`RawRecord`]s. Paged endpoints use a 1-based page number as the cursor;
//! wallet history endpoints return the whole window in one call.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::binance_config::{endpoint, EndpointConfig, PagingMode, ResponseEnvelope, TimestampField};
use super::binance_http::BinanceHttpClient;
use super::shared_resources::global_http_client;
use super::{ExchangeClient, FetchError, FetchResult, Page, PaginationState, RawRecord};
use crate::normalizer::binance_pm::parse_apply_time;
use crate::{DataType, TimeWindow};

/// Exchange name used in job ids, output paths and configuration
pub const EXCHANGE_NAME: &str = "binance_pm";

/// Binance Portfolio Margin account adapter
#[derive(Debug)]
pub struct BinancePmClient {
    http: BinanceHttpClient,
}

impl BinancePmClient {
    /// Adapter signing with `api_key` / `api_secret` over the shared HTTP client
    pub fn new(api_key: &str, api_secret: &str) -> Self {
        Self {
            http: BinanceHttpClient::new(global_http_client(), api_key, api_secret),
        }
    }
}

#[async_trait]
impl ExchangeClient for BinancePmClient {
    fn exchange(&self) -> &str {
        EXCHANGE_NAME
    }

    fn supports(&self, _data_type: DataType) -> bool {
        true
    }

    fn request_weight(&self, data_type: DataType) -> u32 {
        endpoint(data_type).weight
    }

    async fn fetch_page(
        &self,
        data_type: DataType,
        window: &TimeWindow,
        state: &PaginationState,
    ) -> FetchResult<Page> {
        let config = endpoint(data_type);
        let page_number = current_page(state)?;
        let params = request_params(config, window, page_number);

        let response = self.http.signed_get(config.base_url, config.path, &params).await?;
        let items = extract_records(config, response.body)?;
        let count = items.len();

        let mut records = items
            .into_iter()
            .map(|item| to_raw_record(config, item))
            .collect::<FetchResult<Vec<_>>>()?;
        records.sort_by_key(|r| r.timestamp);

        let next_cursor = next_cursor(config, data_type, page_number, count)?;
        debug!(
            data_type = %data_type,
            window = %window,
            page = page_number,
            count,
            has_more = next_cursor.is_some(),
            "Fetched Binance PM page"
        );

        Ok(Page {
            records,
            next_cursor,
            cost: config.weight,
            used_weight: response.used_weight,
        })
    }
}

/// Page number encoded in `state`, starting at 1
pub fn current_page(state: &PaginationState) -> FetchResult<u32> {
    match &state.cursor {
        None => Ok(1),
        Some(cursor) => cursor
            .parse::<u32>()
            .ok()
            .filter(|page| *page >= 1)
            .ok_or_else(|| FetchError::FatalConfig(format!("invalid page cursor '{cursor}'"))),
    }
}

/// Query parameters for one page of `window`; Binance treats `endTime` as inclusive
pub fn request_params(
    config: &EndpointConfig,
    window: &TimeWindow,
    page_number: u32,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("startTime", window.start.to_string()),
        ("endTime", (window.end - 1).max(window.start).to_string()),
        (config.limit_param, config.limit.to_string()),
    ];
    if config.paging == PagingMode::PageNumber {
        params.push((config.page_param, page_number.to_string()));
    }
    params
}

/// Records array from a response body
pub fn extract_records(config: &EndpointConfig, body: Value) -> FetchResult<Vec<Value>> {
    let records = match (config.envelope, body) {
        (ResponseEnvelope::Array, Value::Array(items)) => items,
        (ResponseEnvelope::DataField, Value::Object(mut map)) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(FetchError::MalformedResponse(format!(
                    "{}: 'data' is not an array: {other}",
                    config.path
                )))
            }
        },
        (_, other) => {
            return Err(FetchError::MalformedResponse(format!(
                "{}: unexpected response shape: {other}",
                config.path
            )))
        }
    };
    Ok(records)
}

/// Wrap one response item, reading its event time and native id
pub fn to_raw_record(config: &EndpointConfig, item: Value) -> FetchResult<RawRecord> {
    let timestamp = match config.timestamp_field {
        TimestampField::Millis(field) => {
            let millis = match item.get(field) {
                Some(Value::Number(n)) => n.as_i64(),
                Some(Value::String(s)) => s.parse().ok(),
                _ => None,
            };
            millis.ok_or_else(|| {
                FetchError::MalformedResponse(format!("{}: record without '{field}': {item}", config.path))
            })?
        }
        TimestampField::DateTime(field) => {
            let text = item.get(field).and_then(Value::as_str).ok_or_else(|| {
                FetchError::MalformedResponse(format!("{}: record without '{field}': {item}", config.path))
            })?;
            parse_apply_time(text).map_err(|e| FetchError::MalformedResponse(e.to_string()))?
        }
    };

    let native_id = config.id_field.and_then(|field| match item.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    });

    Ok(RawRecord {
        native_id,
        timestamp,
        payload: item,
    })
}

/// Cursor of the page after `page_number`, or `None` when the window is drained.
///
/// Page-number endpoints may cap a page below `limit`, so only an empty page
/// ends the window.
pub fn next_cursor(
    config: &EndpointConfig,
    data_type: DataType,
    page_number: u32,
    count: usize,
) -> FetchResult<Option<String>> {
    let full = count >= config.limit as usize;
    match config.paging {
        PagingMode::PageNumber if count > 0 => Ok(Some((page_number + 1).to_string())),
        PagingMode::PageNumber => Ok(None),
        PagingMode::SingleShot if full => Err(FetchError::FatalConfig(format!(
            "{data_type} window returned {count} records, the most {} can deliver in order; \
             lower max_window_hours for {data_type}",
            config.path
        ))),
        PagingMode::SingleShot => Ok(None),
    }
}
