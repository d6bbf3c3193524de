use reqwest::StatusCode;
use std::collections::HashSet;

/// Decides whether a completed response warrants another attempt.
///
/// Implementations must be deterministic and free of side effects: the same status code always
/// yields the same answer. A predicate is injected once when the client is built and shared
/// read-only by every request afterwards.
///
/// Closures of type `Fn(StatusCode) -> bool` implement this trait, which covers one-off rules:
///
/// ```
/// use reqwest::StatusCode;
/// use resilient_http::ClientBuilder;
///
/// // Only retry gateway failures.
/// let client = ClientBuilder::new(reqwest::Client::new())
///     .retry_predicate(|status: StatusCode| {
///         status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT
///     })
///     .build();
/// ```
pub trait RetryPredicate: 'static + Send + Sync {
    fn should_retry(&self, status: StatusCode) -> bool;
}

impl<F> RetryPredicate for F
where
    F: Fn(StatusCode) -> bool + Send + Sync + 'static,
{
    fn should_retry(&self, status: StatusCode) -> bool {
        (self)(status)
    }
}

/// The default [`RetryPredicate`]: retry server errors (5xx) only.
///
/// Client errors (4xx) are the caller's mistake and a retry would fail the same way.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPredicate;

impl RetryPredicate for DefaultRetryPredicate {
    fn should_retry(&self, status: StatusCode) -> bool {
        status.as_u16() >= 500
    }
}

/// Retries server errors plus an explicit set of additional statuses.
///
/// ```
/// use reqwest::StatusCode;
/// use resilient_http::{RetryOnStatus, RetryPredicate};
///
/// let predicate = RetryOnStatus::new([StatusCode::TOO_MANY_REQUESTS]);
/// assert!(predicate.should_retry(StatusCode::TOO_MANY_REQUESTS));
/// assert!(predicate.should_retry(StatusCode::BAD_GATEWAY));
/// assert!(!predicate.should_retry(StatusCode::NOT_FOUND));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryOnStatus {
    extra: HashSet<StatusCode>,
}

impl RetryOnStatus {
    pub fn new<I>(extra: I) -> Self
    where
        I: IntoIterator<Item = StatusCode>,
    {
        Self {
            extra: extra.into_iter().collect(),
        }
    }

    /// Also retry `408 Request Timeout` and `429 Too Many Requests`.
    pub fn transient_client_errors() -> Self {
        Self::new([StatusCode::REQUEST_TIMEOUT, StatusCode::TOO_MANY_REQUESTS])
    }
}

impl RetryPredicate for RetryOnStatus {
    fn should_retry(&self, status: StatusCode) -> bool {
        DefaultRetryPredicate.should_retry(status) || self.extra.contains(&status)
    }
}
