//! Per-job settings and default limits

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of retries for a single page fetch.
/// 5 retries with exponential backoff recovers from transient network issues
/// without looping forever on persistent failures (max total wait ~1 minute).
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Retry 5 = 32s is capped to 30s.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30000; // 30 seconds

/// Default request ceiling per replenishment interval.
pub const DEFAULT_MAX_REQUESTS_PER_INTERVAL: u32 = 1200;

/// Default weight ceiling per replenishment interval.
pub const DEFAULT_MAX_WEIGHT_PER_INTERVAL: u32 = 6000;

/// Default replenishment interval (exchange budgets are per minute).
pub const DEFAULT_RATE_INTERVAL_SECS: u64 = 60;

/// Default maximum window span: 24 hours.
pub const DEFAULT_MAX_WINDOW_SPAN_MS: i64 = 24 * 60 * 60 * 1000;

/// Default upper bound on a single rate-budget wait.
/// Two full replenishment intervals: a wait longer than that means the
/// budget is misconfigured or shared with another process.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 120;

/// Backoff and retry budget for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// First backoff delay
    pub base_delay: Duration,
    /// Backoff cap (jitter is added on top)
    pub max_delay: Duration,
    /// Retries allowed per page before the window is aborted
    pub max_retries: u32,
    /// Add random jitter in `[0, backoff/2]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff without jitter: `min(base * 2^attempt, cap)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Fixed-interval request and weight ceilings for one (exchange, account).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Requests allowed per interval
    pub max_requests: u32,
    /// Weight allowed per interval, if the exchange meters weight
    pub max_weight: Option<u32>,
    /// Replenishment interval
    pub interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS_PER_INTERVAL,
            max_weight: Some(DEFAULT_MAX_WEIGHT_PER_INTERVAL),
            interval: Duration::from_secs(DEFAULT_RATE_INTERVAL_SECS),
        }
    }
}

/// Immutable settings a job runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Rate ceilings shared with every job on the same account
    pub rate_limit: RateLimitSettings,
    /// Maximum span of one fetch window (ms)
    pub max_window_span_ms: i64,
    /// Retry behaviour per page
    pub retry: RetryPolicy,
    /// Longest a page fetch may wait for rate budget
    pub acquire_timeout: Duration,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitSettings::default(),
            max_window_span_ms: DEFAULT_MAX_WINDOW_SPAN_MS,
            retry: RetryPolicy::default(),
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl JobSettings {
    /// Check the settings describe a runnable job
    pub fn validate(&self) -> Result<(), String> {
        if self.max_window_span_ms <= 0 {
            return Err(format!(
                "max window span must be positive, got {}ms",
                self.max_window_span_ms
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err("max requests per interval must be positive".to_string());
        }
        if self.rate_limit.max_weight == Some(0) {
            return Err("max weight per interval must be positive".to_string());
        }
        if self.rate_limit.interval.is_zero() {
            return Err("rate limit interval must be positive".to_string());
        }
        Ok(())
    }
}
