//! Unit tests for failure classification and backoff

use crypto_history_exporter::downloader::RetryPolicy;
use crypto_history_exporter::fetcher::retry::failure_kind_from_status;
use crypto_history_exporter::fetcher::retry::FailureKind;
use crypto_history_exporter::fetcher::{Disposition, FetchError, RetryClassifier};
use std::time::Duration;

fn policy(jitter: bool) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(8),
        max_retries: 4,
        jitter,
    }
}

#[test]
fn test_backoff_is_non_decreasing_up_to_the_cap() {
    let classifier = RetryClassifier::new(policy(false));
    let delays: Vec<Duration> = (0..12).map(|attempt| classifier.backoff(attempt)).collect();

    assert_eq!(delays[0], Duration::from_millis(250));
    assert_eq!(delays[1], Duration::from_millis(500));
    assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(delays.iter().all(|d| *d <= Duration::from_secs(8)));
    assert_eq!(*delays.last().unwrap(), Duration::from_secs(8));

    // very large attempts must not overflow
    assert_eq!(classifier.backoff(200), Duration::from_secs(8));
}

#[test]
fn test_jitter_stays_within_half_the_backoff() {
    let classifier = RetryClassifier::new(policy(true));
    for attempt in 0..8 {
        let base = policy(false).backoff(attempt);
        for _ in 0..20 {
            let delay = classifier.backoff(attempt);
            assert!(delay >= base);
            assert!(delay <= base + base / 2);
        }
    }
}

#[test]
fn test_classification_table() {
    let classifier = RetryClassifier::new(policy(false));

    assert_eq!(
        classifier.classify(&FetchError::Auth("bad key".into()), 0),
        Disposition::AbortJob
    );
    assert_eq!(
        classifier.classify(&FetchError::FatalConfig("bad param".into()), 0),
        Disposition::AbortJob
    );
    assert_eq!(
        classifier.classify(&FetchError::TransientNetwork("reset".into()), 0),
        Disposition::Retry(Duration::from_millis(250))
    );
    assert_eq!(
        classifier.classify(
            &FetchError::UpstreamServer {
                status: 503,
                message: "unavailable".into()
            },
            4
        ),
        Disposition::AbortWindow
    );
    assert_eq!(
        classifier.classify(&FetchError::MalformedResponse("eof".into()), 0),
        Disposition::Retry(Duration::from_millis(250))
    );
    assert_eq!(
        classifier.classify(&FetchError::MalformedResponse("eof".into()), 1),
        Disposition::AbortWindow
    );
}

#[test]
fn test_exchange_retry_after_is_used_as_is() {
    let classifier = RetryClassifier::new(policy(false));
    let err = FetchError::RateLimited {
        retry_after: Some(Duration::from_secs(30)),
        message: "banned until".into(),
    };

    // longer than max_delay, still honored
    assert_eq!(
        classifier.classify(&err, 0),
        Disposition::Retry(Duration::from_secs(30))
    );
    assert_eq!(classifier.classify(&err, 4), Disposition::AbortWindow);
}

#[test]
fn test_status_mapping() {
    assert_eq!(failure_kind_from_status(429), Some(FailureKind::RateLimited));
    assert_eq!(failure_kind_from_status(418), Some(FailureKind::RateLimited));
    assert_eq!(failure_kind_from_status(401), Some(FailureKind::Auth));
    assert_eq!(failure_kind_from_status(502), Some(FailureKind::UpstreamServer(502)));
    assert_eq!(failure_kind_from_status(400), Some(FailureKind::FatalConfig));
    assert_eq!(failure_kind_from_status(200), None);
    assert!(!FailureKind::Auth.is_retryable());
    assert!(FailureKind::UpstreamServer(500).is_retryable());
}
