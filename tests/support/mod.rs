//! Scripted exchange adapter and helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use crypto_history_exporter::downloader::{
    FetchOrchestrator, JobSettings, RateGovernor, RateLimitSettings, RetryPolicy,
};
use crypto_history_exporter::fetcher::{
    ExchangeClient, FetchResult, Page, PaginationState, RawRecord,
};
use crypto_history_exporter::resume::CheckpointStore;
use crypto_history_exporter::shutdown::{ShutdownCoordinator, SharedShutdown};
use crypto_history_exporter::{DataType, TimeWindow};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const HOUR: i64 = 3_600_000;

/// One recorded adapter call
#[derive(Debug, Clone)]
pub struct Call {
    pub window: TimeWindow,
    pub state: PaginationState,
    pub at: Instant,
}

/// Adapter serving scripted responses keyed by window start and cursor.
///
/// Unscripted requests get an empty terminal page.
pub struct ScriptedExchange {
    responses: Mutex<HashMap<(i64, Option<String>), VecDeque<FetchResult<Page>>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue `responses` for the request of `window_start` at `cursor`
    pub fn script(
        self,
        window_start: i64,
        cursor: Option<&str>,
        responses: Vec<FetchResult<Page>>,
    ) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry((window_start, cursor.map(str::to_string)))
            .or_default()
            .extend(responses);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    fn exchange(&self) -> &str {
        "binance_pm"
    }

    fn supports(&self, _data_type: DataType) -> bool {
        true
    }

    fn request_weight(&self, _data_type: DataType) -> u32 {
        5
    }

    async fn fetch_page(
        &self,
        _data_type: DataType,
        window: &TimeWindow,
        state: &PaginationState,
    ) -> FetchResult<Page> {
        self.calls.lock().unwrap().push(Call {
            window: *window,
            state: state.clone(),
            at: Instant::now(),
        });
        self.responses
            .lock()
            .unwrap()
            .get_mut(&(window.start, state.cursor.clone()))
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Ok(Page::empty()))
    }
}

/// Raw trade fill as the portfolio margin API returns it
pub fn trade(id: u64, timestamp: i64) -> RawRecord {
    RawRecord {
        native_id: Some(id.to_string()),
        timestamp,
        payload: json!({
            "symbol": "BTCUSDT",
            "id": id,
            "orderId": id * 10,
            "side": if id % 2 == 0 { "BUY" } else { "SELL" },
            "price": "42000.10",
            "qty": "0.001",
            "commission": "0.0042",
            "commissionAsset": "USDT",
            "time": timestamp,
        }),
    }
}

/// Page continuing at `next`
pub fn page(records: Vec<RawRecord>, next: &str) -> FetchResult<Page> {
    Ok(Page {
        records,
        next_cursor: Some(next.to_string()),
        cost: 5,
        used_weight: None,
    })
}

/// Last page of a window
pub fn last_page(records: Vec<RawRecord>) -> FetchResult<Page> {
    Ok(Page {
        records,
        next_cursor: None,
        cost: 5,
        used_weight: None,
    })
}

/// Settings with day-long windows, fast retries and no jitter
pub fn settings() -> JobSettings {
    JobSettings {
        rate_limit: RateLimitSettings {
            max_requests: 1200,
            max_weight: Some(6000),
            interval: Duration::from_secs(60),
        },
        max_window_span_ms: 24 * HOUR,
        retry: RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_retries: 2,
            jitter: false,
        },
        acquire_timeout: Duration::from_secs(120),
    }
}

/// Orchestrator with its own governor and shutdown handle
pub fn orchestrator(
    client: Arc<ScriptedExchange>,
    store: Arc<dyn CheckpointStore>,
    settings: JobSettings,
) -> (FetchOrchestrator, SharedShutdown) {
    let shutdown = ShutdownCoordinator::shared();
    let governor = Arc::new(RateGovernor::new("binance_pm/main", settings.rate_limit));
    let orchestrator = FetchOrchestrator::new(client, store, settings)
        .with_governor(governor)
        .with_shutdown(shutdown.clone());
    (orchestrator, shutdown)
}
