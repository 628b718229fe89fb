//! Integration tests for shared rate budgets

use crypto_history_exporter::downloader::{
    GovernorRegistry, RateGovernor, RateLimitError, RateLimitSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const INTERVAL: Duration = Duration::from_secs(60);

fn request_limited(max_requests: u32) -> RateLimitSettings {
    RateLimitSettings {
        max_requests,
        max_weight: None,
        interval: INTERVAL,
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_never_exceed_the_interval_budget() {
    let governor = Arc::new(RateGovernor::new("binance_pm/main", request_limited(10)));
    let origin = Instant::now();

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let governor = governor.clone();
            tokio::spawn(async move {
                governor.acquire(1, Duration::from_secs(600)).await.unwrap();
                Instant::now().duration_since(origin)
            })
        })
        .collect();

    let mut granted = Vec::new();
    for handle in handles {
        granted.push(handle.await.unwrap());
    }

    let mut per_interval = [0u32; 4];
    for at in granted {
        let index = (at.as_secs() / INTERVAL.as_secs()) as usize;
        per_interval[index] += 1;
    }
    assert_eq!(per_interval, [10, 10, 5, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_weight_budget_blocks_until_reset() {
    let governor = RateGovernor::new(
        "binance_pm/main",
        RateLimitSettings {
            max_requests: 100,
            max_weight: Some(100),
            interval: INTERVAL,
        },
    );

    assert_eq!(governor.acquire(40, INTERVAL * 2).await.unwrap(), Duration::ZERO);
    assert_eq!(governor.acquire(40, INTERVAL * 2).await.unwrap(), Duration::ZERO);

    let waited = governor.acquire(40, INTERVAL * 2).await.unwrap();
    assert!(waited >= INTERVAL);

    let budget = governor.snapshot().await;
    assert_eq!(budget.remaining_weight, Some(60));
    assert_eq!(budget.remaining_requests, 99);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_fails_when_reset_is_past_the_deadline() {
    let governor = RateGovernor::new("binance_pm/main", request_limited(1));
    governor.acquire(1, Duration::from_secs(1)).await.unwrap();

    let err = governor
        .acquire(1, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RateLimitError::Timeout {
            max_wait: Duration::from_secs(10),
            cost: 1
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_reported_weight_only_shrinks_the_budget() {
    let governor = RateGovernor::new(
        "binance_pm/main",
        RateLimitSettings {
            max_requests: 1200,
            max_weight: Some(6000),
            interval: INTERVAL,
        },
    );

    governor.reconcile_used_weight(5900).await;
    assert_eq!(governor.snapshot().await.remaining_weight, Some(100));

    // A lower report from the exchange does not hand budget back
    governor.reconcile_used_weight(10).await;
    assert_eq!(governor.snapshot().await.remaining_weight, Some(100));

    tokio::time::advance(INTERVAL).await;
    assert_eq!(governor.snapshot().await.remaining_weight, Some(6000));
}

#[test]
fn test_registry_shares_one_governor_per_account() {
    let registry = GovernorRegistry::new();
    let a = registry.get_or_create("binance_pm", "main", request_limited(10));
    let b = registry.get_or_create("binance_pm", "main", request_limited(99));
    let other = registry.get_or_create("binance_pm", "sub", request_limited(10));

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &other));
    // First settings win
    assert_eq!(b.settings().max_requests, 10);
}
