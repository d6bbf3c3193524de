use crate::error::Error;
use crate::predicate::RetryPredicate;
use reqwest::Response;

/// Classification of the outcome of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryable {
    /// The failure was due to something that might resolve in the future.
    Transient,
    /// Unresolvable error.
    Fatal,
}

impl Retryable {
    /// Classify a response that came back from the transport.
    ///
    /// Returns `None` if the response is final and should be handed to the caller. A server error
    /// (5xx) that the predicate declines to retry is [`Retryable::Fatal`]: it ends the request as a
    /// failure without using the rest of the budget.
    pub fn from_response(res: &Response, predicate: &dyn RetryPredicate) -> Option<Self> {
        let status = res.status();
        if predicate.should_retry(status) {
            Some(Retryable::Transient)
        } else if status.is_server_error() {
            Some(Retryable::Fatal)
        } else {
            None
        }
    }

    /// Classify a failure in which no response was produced.
    ///
    /// Anything that went wrong on the way to or from the server counts against the retry budget.
    /// Errors raised before the request left the process (bad request construction) and
    /// cancellation are final.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Reqwest(e) if e.is_builder() => Retryable::Fatal,
            Error::Reqwest(_) | Error::Transport(_) => Retryable::Transient,
            Error::Construction(_) | Error::RetryExhausted(_) | Error::Cancelled => {
                Retryable::Fatal
            }
        }
    }
}
