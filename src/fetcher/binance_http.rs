//! Signed Binance HTTP transport
//!
//! Provides one signed GET for all Binance API interactions with:
//! - HMAC-SHA256 query signing
//! - Status and error-code classification into [`FetchError`]
//! - Weight header parsing
//! - Secret redaction for logs
//!
//! Retries are not performed here; the pagination driver owns them.

use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::binance_config::RECV_WINDOW_MS;
use super::retry::{failure_kind_from_status, FailureKind};
use super::{FetchError, FetchResult};
use crate::metrics::HttpRequestMetrics;

/// Binance error codes meaning the key, signature or permissions were rejected
pub const AUTH_ERROR_CODES: [i64; 3] = [-2014, -2015, -1022];

/// Header carrying the used request weight on PAPI and FAPI hosts
pub const USED_WEIGHT_HEADER: &str = "X-MBX-USED-WEIGHT-1M";

/// Header carrying the used IP weight on SAPI hosts
pub const SAPI_USED_WEIGHT_HEADER: &str = "X-SAPI-USED-IP-WEIGHT-1M";

/// Longest response excerpt carried in an error message
const MAX_ERROR_BODY_CHARS: usize = 256;

/// Query parameters whose values are redacted in logs
const SENSITIVE_PARAMS: [&str; 5] = ["signature", "key", "secret", "passphrase", "token"];

type HmacSha256 = Hmac<Sha256>;

/// Binance error body, e.g. `{"code":-2015,"msg":"Invalid API-key"}`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Decoded body of a successful call
#[derive(Debug, Clone)]
pub struct SignedResponse {
    /// JSON body
    pub body: Value,
    /// Weight the exchange reports as used in its current interval
    pub used_weight: Option<u32>,
}

/// Signed GET client for one API key
pub struct BinanceHttpClient {
    client: Arc<Client>,
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for BinanceHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceHttpClient")
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

impl BinanceHttpClient {
    /// Create new HTTP client
    ///
    /// # Arguments
    /// * `client` - Shared HTTP client (Arc for cheap cloning)
    /// * `api_key` - Sent in the `X-MBX-APIKEY` header
    /// * `api_secret` - Signs the query string
    pub fn new(client: Arc<Client>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Execute a signed GET and decode the JSON body
    ///
    /// `timestamp`, `recvWindow` and `signature` are appended to `params`.
    ///
    /// # Errors
    /// Every failure is classified into a [`FetchError`] kind
    pub async fn signed_get(
        &self,
        base_url: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> FetchResult<SignedResponse> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let url = build_signed_url(base_url, path, params, timestamp, &self.api_secret)?;

        debug!(
            path,
            params = ?redact_params(params),
            "Making signed GET request"
        );

        let metrics = HttpRequestMetrics::start(path).await;
        let response = match self
            .client
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                metrics.record_network_error();
                return Err(transport_error(&e));
            }
        };

        let status = response.status().as_u16();
        metrics.record_complete(status);
        let headers = response.headers().clone();
        let used_weight = parse_weight_header(&headers);

        let text = response.text().await.map_err(|e| transport_error(&e))?;

        if let Some(err) = error_for_status(status, parse_retry_after(&headers), &text) {
            warn!(
                path,
                status,
                correlation_id = %metrics.correlation_id(),
                error = %err,
                "Request rejected"
            );
            return Err(err);
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            FetchError::MalformedResponse(format!(
                "failed to decode {path} response: {e}: {}",
                excerpt(&text)
            ))
        })?;

        Ok(SignedResponse { body, used_weight })
    }
}

/// Hex HMAC-SHA256 of `payload` keyed by `secret`
pub fn sign(secret: &str, payload: &str) -> FetchResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| FetchError::FatalConfig(format!("invalid API secret: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Full request URL with `timestamp`, `recvWindow` and the trailing `signature`
pub fn build_signed_url(
    base_url: &str,
    path: &str,
    params: &[(&str, String)],
    timestamp: i64,
    secret: &str,
) -> FetchResult<Url> {
    let mut url = Url::parse(&format!("{base_url}{path}"))
        .map_err(|e| FetchError::FatalConfig(format!("invalid endpoint {base_url}{path}: {e}")))?;
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
        .append_pair("recvWindow", &RECV_WINDOW_MS.to_string())
        .append_pair("timestamp", &timestamp.to_string());

    let signature = sign(secret, url.query().unwrap_or_default())?;
    url.query_pairs_mut().append_pair("signature", &signature);
    Ok(url)
}

/// Classify a non-success response; `None` when `status` is a success
pub fn error_for_status(status: u16, retry_after: Option<Duration>, body: &str) -> Option<FetchError> {
    let api_error = serde_json::from_str::<ApiErrorBody>(body).ok();

    if let Some(api_error) = &api_error {
        if AUTH_ERROR_CODES.contains(&api_error.code) {
            return Some(FetchError::Auth(format!(
                "{} (code {})",
                api_error.msg, api_error.code
            )));
        }
    }

    let kind = failure_kind_from_status(status)?;
    let message = match api_error {
        Some(api_error) => format!("{} (code {})", api_error.msg, api_error.code),
        None => format!("HTTP {status}: {}", excerpt(body)),
    };

    Some(match kind {
        FailureKind::RateLimited => FetchError::RateLimited {
            retry_after,
            message,
        },
        FailureKind::Auth => FetchError::Auth(message),
        FailureKind::UpstreamServer(status) => FetchError::UpstreamServer { status, message },
        FailureKind::FatalConfig => FetchError::FatalConfig(message),
        FailureKind::TransientNetwork => FetchError::TransientNetwork(message),
        FailureKind::MalformedResponse => FetchError::MalformedResponse(message),
    })
}

/// Classify a `reqwest` failure
fn transport_error(e: &reqwest::Error) -> FetchError {
    if e.is_decode() {
        FetchError::MalformedResponse(e.to_string())
    } else if e.is_builder() {
        FetchError::FatalConfig(e.to_string())
    } else {
        FetchError::TransientNetwork(e.to_string())
    }
}

/// Parse the used-weight header of either host family
pub fn parse_weight_header(headers: &HeaderMap) -> Option<u32> {
    let value = headers
        .get(USED_WEIGHT_HEADER)
        .or_else(|| headers.get(SAPI_USED_WEIGHT_HEADER))?
        .to_str()
        .ok()?;

    match value.parse::<u32>() {
        Ok(weight) => Some(weight),
        Err(e) => {
            warn!("Failed to parse weight header '{}': {}", value, e);
            None
        }
    }
}

/// Parse `Retry-After` given in whole seconds
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Mask a secret for logging: `abc***xyz` for long values, `***` otherwise
pub fn redact(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 6 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{head}***{tail}")
    } else {
        "***".to_string()
    }
}

/// Copy of `params` with sensitive values redacted
pub fn redact_params(params: &[(&str, String)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| {
            let lowered = key.to_lowercase();
            let value = if SENSITIVE_PARAMS.iter().any(|s| lowered.contains(s)) {
                redact(value)
            } else {
                value.clone()
            };
            (key.to_string(), value)
        })
        .collect()
}

fn excerpt(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}...")
    }
}
