//! Retry classification and retry message formatting
//!
//! [`RetryClassifier`] maps one failed page attempt to a [`Disposition`].
//! Attempts are counted per page: the driver resets the counter after every
//! successful page.

use super::FetchError;
use crate::downloader::config::RetryPolicy;
use crate::TimeWindow;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// Retries allowed for a malformed response before the window is aborted.
/// One retry covers a truncated body; a second identical failure is a schema change.
pub const MALFORMED_RESPONSE_RETRIES: u32 = 1;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Repeat the identical request after the delay
    Retry(Duration),
    /// Give up on the current window; other windows continue
    AbortWindow,
    /// Stop the whole job
    AbortJob,
}

/// Failure category for classification and user messaging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Exchange rate limit hit
    RateLimited,
    /// Connection failure or timeout
    TransientNetwork,
    /// HTTP 5xx
    UpstreamServer(u16),
    /// Undecodable body
    MalformedResponse,
    /// Credentials rejected
    Auth,
    /// Request can never succeed as configured
    FatalConfig,
}

impl FailureKind {
    /// Category of `err`
    pub fn of(err: &FetchError) -> Self {
        match err {
            FetchError::RateLimited { .. } => Self::RateLimited,
            FetchError::TransientNetwork(_) => Self::TransientNetwork,
            FetchError::UpstreamServer { status, .. } => Self::UpstreamServer(*status),
            FetchError::MalformedResponse(_) => Self::MalformedResponse,
            FetchError::Auth(_) => Self::Auth,
            FetchError::FatalConfig(_) => Self::FatalConfig,
        }
    }

    /// User-friendly description used inside retry log messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate limit exceeded",
            Self::TransientNetwork => "network error",
            Self::UpstreamServer(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::MalformedResponse => "malformed response",
            Self::Auth => "authentication failed",
            Self::FatalConfig => "invalid request",
        }
    }

    /// Suggested remediation shown after a final failure
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::RateLimited => "Lower the configured rate limit or reduce --concurrency",
            Self::TransientNetwork => "Check network connectivity and try again",
            Self::UpstreamServer(_) => "Exchange may be experiencing issues, resume later",
            Self::MalformedResponse => "The exchange response format may have changed",
            Self::Auth => "Verify the API key, secret and read permissions",
            Self::FatalConfig => "Review the account and data type configuration",
        }
    }

    /// Whether the kind is ever retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth | Self::FatalConfig)
    }
}

/// Failure kind for a non-success HTTP status, `None` for anything below 400.
///
/// Exchange-specific error codes in the body take precedence over this
/// mapping (Binance reports rejected keys as plain 400s).
pub fn failure_kind_from_status(status: u16) -> Option<FailureKind> {
    match status {
        429 | 418 => Some(FailureKind::RateLimited),
        401 | 403 => Some(FailureKind::Auth),
        500..=599 => Some(FailureKind::UpstreamServer(status)),
        400..=499 => Some(FailureKind::FatalConfig),
        _ => None,
    }
}

/// Maps failed attempts to retry decisions
#[derive(Debug, Clone, Copy)]
pub struct RetryClassifier {
    policy: RetryPolicy,
}

impl RetryClassifier {
    /// Classifier for `policy`
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide what follows failure `err` on zero-based retry `attempt` of a page
    pub fn classify(&self, err: &FetchError, attempt: u32) -> Disposition {
        match err {
            FetchError::Auth(_) | FetchError::FatalConfig(_) => Disposition::AbortJob,
            FetchError::MalformedResponse(_) => {
                if attempt < MALFORMED_RESPONSE_RETRIES.min(self.policy.max_retries) {
                    Disposition::Retry(self.backoff(attempt))
                } else {
                    Disposition::AbortWindow
                }
            }
            FetchError::RateLimited { retry_after, .. } => {
                if attempt >= self.policy.max_retries {
                    return Disposition::AbortWindow;
                }
                // Exchange-supplied waits are authoritative and not capped
                match retry_after {
                    Some(delay) => Disposition::Retry(*delay),
                    None => Disposition::Retry(self.backoff(attempt)),
                }
            }
            FetchError::TransientNetwork(_) | FetchError::UpstreamServer { .. } => {
                if attempt >= self.policy.max_retries {
                    Disposition::AbortWindow
                } else {
                    Disposition::Retry(self.backoff(attempt))
                }
            }
        }
    }

    /// Exponential backoff for `attempt` with jitter in `[0, backoff/2]`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.policy.backoff(attempt);
        if !self.policy.jitter {
            return base;
        }
        let max_jitter_ms = (base.as_millis() / 2) as u64;
        if max_jitter_ms == 0 {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Context for formatting retry messages
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current retry number (1-based)
    pub attempt: u32,
    /// Maximum number of retries configured
    pub max_retries: u32,
    /// Kind of failure that triggered the retry
    pub kind: FailureKind,
    /// Delay before the next attempt
    pub backoff: Duration,
    /// Job being fetched
    pub job_id: String,
    /// Window being fetched
    pub window: Option<TimeWindow>,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Context for retry `attempt` of `err`
    pub fn new(
        attempt: u32,
        max_retries: u32,
        err: &FetchError,
        backoff: Duration,
        job_id: impl Into<String>,
        window: Option<TimeWindow>,
    ) -> Self {
        Self {
            attempt,
            max_retries,
            kind: FailureKind::of(err),
            backoff,
            job_id: job_id.into(),
            window,
            error_message: err.to_string(),
        }
    }

    /// Standardized retry message with attempt counters and context
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt,
            self.max_retries,
            self.kind.description(),
            self.backoff.as_secs_f64()
        );
        append_job_and_window(&mut message, &self.job_id, self.window);
        message
    }

    /// Message logged when a retried page eventually succeeds
    pub fn format_success(&self) -> String {
        let mut message = format!(
            "Retry attempt {}/{} succeeded - resuming export",
            self.attempt, self.max_retries
        );
        append_job_and_window(&mut message, &self.job_id, self.window);
        message
    }

    /// Final failure summary with suggestions
    pub fn format_failure(&self) -> String {
        let window_display = self
            .window
            .map(|w| format!("{} to {}", format_timestamp(w.start), format_timestamp(w.end)))
            .unwrap_or_else(|| "unknown".to_string());

        let mut lines = vec![
            format!("[FAILED] Window failed after {} attempts", self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Job: {}", self.job_id),
            format!("  Window: {window_display}"),
            "  Suggestions:".to_string(),
        ];
        lines.push(format!("    - {}", self.kind.suggestion()));
        if self.kind.is_retryable() {
            lines.push("    - Re-run with --resume on to refetch only the failed windows".to_string());
        }
        lines.join("\n")
    }
}

fn append_job_and_window(buffer: &mut String, job_id: &str, window: Option<TimeWindow>) {
    if !job_id.is_empty() {
        buffer.push_str(&format!(" ({job_id})"));
    }
    if let Some(window) = window {
        buffer.push_str(&format!(
            " {} to {}",
            format_timestamp(window.start),
            format_timestamp(window.end)
        ));
    }
}

fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(jitter: bool) -> RetryClassifier {
        RetryClassifier::new(RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_retries: 3,
            jitter,
        })
    }

    fn server_error() -> FetchError {
        FetchError::UpstreamServer {
            status: 503,
            message: "busy".to_string(),
        }
    }

    #[test]
    fn test_auth_and_config_abort_job() {
        let classifier = classifier(false);
        assert_eq!(
            classifier.classify(&FetchError::Auth("bad key".into()), 0),
            Disposition::AbortJob
        );
        assert_eq!(
            classifier.classify(&FetchError::FatalConfig("bad symbol".into()), 0),
            Disposition::AbortJob
        );
    }

    #[test]
    fn test_transient_retries_until_budget_exhausted() {
        let classifier = classifier(false);
        assert_eq!(
            classifier.classify(&server_error(), 0),
            Disposition::Retry(Duration::from_millis(100))
        );
        assert_eq!(
            classifier.classify(&server_error(), 2),
            Disposition::Retry(Duration::from_millis(400))
        );
        assert_eq!(classifier.classify(&server_error(), 3), Disposition::AbortWindow);
        assert_eq!(
            classifier.classify(&FetchError::TransientNetwork("reset".into()), 3),
            Disposition::AbortWindow
        );
    }

    #[test]
    fn test_malformed_retried_once() {
        let classifier = classifier(false);
        let err = FetchError::MalformedResponse("truncated".into());
        assert!(matches!(classifier.classify(&err, 0), Disposition::Retry(_)));
        assert_eq!(classifier.classify(&err, 1), Disposition::AbortWindow);
    }

    #[test]
    fn test_rate_limited_honours_retry_after() {
        let classifier = classifier(true);
        let err = FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
            message: "429".into(),
        };
        assert_eq!(
            classifier.classify(&err, 0),
            Disposition::Retry(Duration::from_secs(5))
        );
        assert_eq!(classifier.classify(&err, 3), Disposition::AbortWindow);
    }

    #[test]
    fn test_failure_kind_from_status() {
        assert_eq!(failure_kind_from_status(429), Some(FailureKind::RateLimited));
        assert_eq!(failure_kind_from_status(418), Some(FailureKind::RateLimited));
        assert_eq!(failure_kind_from_status(401), Some(FailureKind::Auth));
        assert_eq!(failure_kind_from_status(503), Some(FailureKind::UpstreamServer(503)));
        assert_eq!(failure_kind_from_status(400), Some(FailureKind::FatalConfig));
        assert_eq!(failure_kind_from_status(200), None);
    }

    #[test]
    fn test_jitter_stays_within_half_backoff() {
        let classifier = classifier(true);
        for attempt in 0..6 {
            let base = classifier.policy().backoff(attempt);
            for _ in 0..50 {
                let delay = classifier.backoff(attempt);
                assert!(delay >= base);
                assert!(delay <= base + base / 2);
            }
        }
    }

    #[test]
    fn test_retry_context_messages() {
        let ctx = RetryContext::new(
            2,
            5,
            &server_error(),
            Duration::from_millis(1500),
            "binance_pm_main_trades_0_1",
            Some(TimeWindow::new(1704067200000, 1704153600000)),
        );
        let retry = ctx.format_retry();
        assert!(retry.contains("attempt 2/5"));
        assert!(retry.contains("service unavailable"));
        assert!(retry.contains("1.5 seconds"));
        assert!(retry.contains("2024-01-01 00:00:00 to 2024-01-02 00:00:00"));

        let failure = ctx.format_failure();
        assert!(failure.contains("Last error: upstream server error (HTTP 503): busy"));
        assert!(failure.contains("--resume on"));
    }
}
