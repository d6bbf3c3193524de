use reqwest::{Client, Request, Response};
use std::time::Duration;

use crate::error::{Error, Result};

/// Connect timeout of the default transport.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Overall per-attempt timeout of the default transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The mechanism that performs a single network call for a [`ResilientClient`].
///
/// A transport makes exactly one attempt per call. Retrying, backoff and body release are handled
/// by the client, so implementations should not retry on their own.
///
/// # Example
///
/// ```
/// use reqwest::{Request, Response};
/// use resilient_http::{Result, Transport};
///
/// struct LoggingTransport(reqwest::Client);
///
/// #[async_trait::async_trait]
/// impl Transport for LoggingTransport {
///     async fn execute(&self, req: Request) -> Result<Response> {
///         println!("Sending {} {}", req.method(), req.url());
///         self.0.execute(req).await.map_err(Into::into)
///     }
/// }
/// ```
///
/// [`ResilientClient`]: crate::ResilientClient
#[async_trait::async_trait]
pub trait Transport: 'static + Send + Sync {
    /// Sends `req` and resolves once response headers are available.
    ///
    /// Failures that produced no response at all should be reported with
    /// [`Error::Reqwest`] or [`Error::transport`].
    async fn execute(&self, req: Request) -> Result<Response>;
}

#[async_trait::async_trait]
impl Transport for Client {
    async fn execute(&self, req: Request) -> Result<Response> {
        Client::execute(self, req).await.map_err(Error::from)
    }
}

/// Builds the general-purpose reqwest client used when no transport is supplied.
pub fn default_transport() -> Result<Client> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(Error::from)
}
