//! Shared resources for all adapter instances
//!
//! Global singletons for the HTTP client and the rate governor registry, so
//! that every job touching the same (exchange, account) draws from one
//! budget.
//!
//! # Critical for Production
//!
//! Binance meters weight per IP and per account. If each job created its own
//! governor, concurrent jobs would bypass the shared quota and risk bans.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::downloader::config::RateLimitSettings;
use crate::downloader::rate_limit::{GovernorRegistry, RateGovernor};

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Global HTTP client shared by all adapter instances
///
/// Configured with explicit timeouts to prevent indefinite hangs:
/// - Connect timeout: 10 seconds
/// - Request timeout: 30 seconds
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    Arc::new(
        Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                panic!("FATAL: Failed to build HTTP client: {}. Check system TLS configuration.", e);
            }),
    )
});

/// Process-wide governor registry
pub static GLOBAL_GOVERNORS: Lazy<GovernorRegistry> = Lazy::new(GovernorRegistry::new);

/// Get the global HTTP client
///
/// Returns a clone of the shared Arc
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}

/// Governor for (exchange, account), created with `settings` on first use
pub fn global_governor(exchange: &str, account: &str, settings: RateLimitSettings) -> Arc<RateGovernor> {
    GLOBAL_GOVERNORS.get_or_create(exchange, account, settings)
}
