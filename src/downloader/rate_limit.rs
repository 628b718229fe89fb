//! Fixed-interval rate governance
//!
//! A [`RateGovernor`] tracks the request and weight budget of one
//! (exchange, account) pair. Budgets refill to their ceilings at fixed
//! boundaries `created_at + k * interval`, the way exchanges meter per-minute
//! quotas, and every check-and-debit happens inside one critical section.

use super::config::RateLimitSettings;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Remaining budget in the current interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    /// Requests left before the reset
    pub remaining_requests: u32,
    /// Weight left before the reset, if weight is metered
    pub remaining_weight: Option<u32>,
    /// When the budget refills
    pub resets_at: Instant,
}

#[derive(Debug)]
struct Bucket {
    remaining_requests: u32,
    remaining_weight: Option<u32>,
    interval_start: Instant,
}

/// Shared request/weight budget for one (exchange, account)
#[derive(Debug)]
pub struct RateGovernor {
    label: String,
    settings: RateLimitSettings,
    bucket: Mutex<Bucket>,
}

impl RateGovernor {
    /// Create a governor with a full budget starting now
    pub fn new(label: impl Into<String>, settings: RateLimitSettings) -> Self {
        Self {
            label: label.into(),
            settings,
            bucket: Mutex::new(Bucket {
                remaining_requests: settings.max_requests,
                remaining_weight: settings.max_weight,
                interval_start: Instant::now(),
            }),
        }
    }

    /// Governor label ("exchange/account")
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Configured ceilings
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Wait until one request of weight `cost` fits the budget, then debit it.
    ///
    /// Fails only when the budget cannot refill before `max_wait` elapses.
    /// Returns the time spent waiting.
    pub async fn acquire(&self, cost: u32, max_wait: Duration) -> Result<Duration, RateLimitError> {
        let started = Instant::now();
        let deadline = started + max_wait;
        let cost = self.clamp_cost(cost);

        loop {
            let next_reset = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket, Instant::now());

                let weight_ok = bucket.remaining_weight.map_or(true, |w| w >= cost);
                if bucket.remaining_requests >= 1 && weight_ok {
                    bucket.remaining_requests -= 1;
                    if let Some(weight) = bucket.remaining_weight.as_mut() {
                        *weight -= cost;
                    }
                    let waited = started.elapsed();
                    if !waited.is_zero() {
                        debug!(
                            governor = %self.label,
                            waited_ms = waited.as_millis() as u64,
                            "Rate budget available after wait"
                        );
                    }
                    return Ok(waited);
                }

                bucket.interval_start + self.settings.interval
            };

            if next_reset > deadline {
                warn!(
                    governor = %self.label,
                    cost,
                    max_wait_ms = max_wait.as_millis() as u64,
                    "Rate budget will not refill before deadline"
                );
                return Err(RateLimitError::Timeout { max_wait, cost });
            }

            debug!(
                governor = %self.label,
                cost,
                wait_ms = next_reset.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate budget exhausted, waiting for reset"
            );
            sleep_until(next_reset).await;
        }
    }

    /// Lower the remaining weight to what the exchange reports as used.
    ///
    /// Exchanges count weight from other clients on the same key too, so the
    /// local budget can only shrink here, never grow.
    pub async fn reconcile_used_weight(&self, used: u32) {
        let Some(max_weight) = self.settings.max_weight else {
            return;
        };
        crate::metrics::record_api_weight(&self.label, used, max_weight);
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        let reported_remaining = max_weight.saturating_sub(used);
        if let Some(remaining) = bucket.remaining_weight.as_mut() {
            if reported_remaining < *remaining {
                debug!(
                    governor = %self.label,
                    local_remaining = *remaining,
                    reported_remaining,
                    "Reconciled weight with exchange header"
                );
                *remaining = reported_remaining;
            }
        }
    }

    /// Current budget
    pub async fn snapshot(&self) -> RateBudget {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket, Instant::now());
        RateBudget {
            remaining_requests: bucket.remaining_requests,
            remaining_weight: bucket.remaining_weight,
            resets_at: bucket.interval_start + self.settings.interval,
        }
    }

    fn clamp_cost(&self, cost: u32) -> u32 {
        match self.settings.max_weight {
            Some(max_weight) if cost > max_weight => {
                warn!(
                    governor = %self.label,
                    cost,
                    max_weight,
                    "Request cost exceeds weight ceiling, clamping"
                );
                max_weight
            }
            _ => cost,
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let interval_ms = self.settings.interval.as_millis().max(1);
        let elapsed_ms = now.saturating_duration_since(bucket.interval_start).as_millis();
        let periods = elapsed_ms / interval_ms;
        if periods == 0 {
            return;
        }

        let advance_ms = u64::try_from(periods * interval_ms).unwrap_or(u64::MAX);
        bucket.interval_start += Duration::from_millis(advance_ms);
        bucket.remaining_requests = self.settings.max_requests;
        bucket.remaining_weight = self.settings.max_weight;
    }
}

/// One governor per (exchange, account), shared by every job on that pair
#[derive(Debug, Default)]
pub struct GovernorRegistry {
    governors: StdMutex<HashMap<(String, String), Arc<RateGovernor>>>,
}

impl GovernorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Governor for the pair, created with `settings` on first use
    pub fn get_or_create(
        &self,
        exchange: &str,
        account: &str,
        settings: RateLimitSettings,
    ) -> Arc<RateGovernor> {
        let mut governors = match self.governors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        governors
            .entry((exchange.to_string(), account.to_string()))
            .or_insert_with(|| Arc::new(RateGovernor::new(format!("{exchange}/{account}"), settings)))
            .clone()
    }
}

/// Rate governor errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Budget could not be satisfied within the caller's deadline
    #[error("rate budget for cost {cost} not available within {max_wait:?}")]
    Timeout {
        /// Caller-supplied maximum wait
        max_wait: Duration,
        /// Requested cost after clamping
        cost: u32,
    },
}
