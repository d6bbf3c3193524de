use reqwest::{Response, StatusCode, Url};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The request could not be constructed (bad method, URL or body).
    #[error("Invalid request: {0}")]
    Construction(#[source] anyhow::Error),
    /// Error from the underlying reqwest client
    #[error("Request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// A custom [`Transport`](crate::Transport) failed to produce a response.
    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),
    /// Every attempt allowed by the retry budget was used up.
    #[error(transparent)]
    RetryExhausted(Box<RetryExhausted>),
    /// The request's cancellation token fired during an attempt or a backoff pause.
    #[error("Request was cancelled")]
    Cancelled,
}

/// Terminal failure once the retry budget is consumed.
///
/// Carries the last response (if the final attempt produced one) so callers can still inspect
/// its headers and body.
#[derive(Error, Debug)]
#[error(
    "request failed after {attempts} of {budget} attempts: last status={}",
    describe_status(.last_status)
)]
pub struct RetryExhausted {
    pub(crate) budget: u32,
    pub(crate) attempts: u32,
    pub(crate) last_status: Option<StatusCode>,
    pub(crate) response: Option<Response>,
    #[source]
    pub(crate) last_error: Option<Box<Error>>,
}

fn describe_status(status: &Option<StatusCode>) -> String {
    match status {
        Some(status) => status.as_u16().to_string(),
        None => "no response".to_string(),
    }
}

impl RetryExhausted {
    /// The configured maximum number of attempts.
    pub fn budget(&self) -> u32 {
        self.budget
    }

    /// Attempts actually performed. Lower than the budget only when the request body could not be
    /// replayed.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Status of the last response observed on any attempt, `None` if no attempt got a response.
    pub fn last_status(&self) -> Option<StatusCode> {
        self.last_status
    }

    /// The response of the final attempt, if that attempt produced one.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn into_response(self) -> Option<Response> {
        self.response
    }

    /// The transport failure of the final attempt, if it failed below the HTTP layer.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_deref()
    }
}

impl Error {
    pub fn construction<E>(err: E) -> Self
    where
        E: 'static + Send + Sync + std::error::Error,
    {
        Error::Construction(err.into())
    }

    pub fn transport<E>(err: E) -> Self
    where
        E: 'static + Send + Sync + std::error::Error,
    {
        Error::Transport(err.into())
    }

    /// Returns true if the retry budget was exhausted.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Error::RetryExhausted(_))
    }

    /// Returns true if the request was cancelled through its cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true if the error is from a type Builder.
    pub fn is_builder(&self) -> bool {
        match self {
            Error::Construction(_) => true,
            Error::Reqwest(e) => e.is_builder(),
            _ => false,
        }
    }

    /// Returns true if the error is related to a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Reqwest(e) => e.is_timeout(),
            Error::RetryExhausted(e) => e.last_error().is_some_and(Error::is_timeout),
            _ => false,
        }
    }

    /// Returns true if the error is related to connect
    pub fn is_connect(&self) -> bool {
        match self {
            Error::Reqwest(e) => e.is_connect(),
            Error::RetryExhausted(e) => e.last_error().is_some_and(Error::is_connect),
            _ => false,
        }
    }

    /// Returns a possible URL related to this error.
    pub fn url(&self) -> Option<&Url> {
        match self {
            Error::Reqwest(e) => e.url(),
            Error::RetryExhausted(e) => e
                .response()
                .map(Response::url)
                .or_else(|| e.last_error().and_then(Error::url)),
            _ => None,
        }
    }

    /// Returns the last known status code, if the error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Reqwest(e) => e.status(),
            Error::RetryExhausted(e) => e.last_status(),
            _ => None,
        }
    }

    /// Takes the final response out of a [`RetryExhausted`] error.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Error::RetryExhausted(e) => e.into_response(),
            _ => None,
        }
    }
}

impl From<RetryExhausted> for Error {
    fn from(err: RetryExhausted) -> Self {
        Error::RetryExhausted(Box::new(err))
    }
}
