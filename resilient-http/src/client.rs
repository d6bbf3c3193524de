use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Body, Method, Response};
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::error::{Error, Result};
use crate::predicate::{DefaultRetryPredicate, RetryPredicate};
use crate::request::Request;
use crate::transport::{default_transport, Transport};

/// Maximum number of attempts used when none is configured.
pub const DEFAULT_RETRY_BUDGET: u32 = 4;
/// Bytes read from a discarded response before it is dropped.
pub const DEFAULT_DRAIN_LIMIT: usize = 64 * 1024;
/// Time allowed for draining a discarded response before it is dropped.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A `ClientBuilder` is used to build a [`ResilientClient`].
///
/// ```
/// use resilient_http::{ClientBuilder, ExponentialBackoff, RetryOnStatus};
/// use std::time::Duration;
///
/// let client = ClientBuilder::new(reqwest::Client::new())
///     .retry_budget(3)
///     .retry_predicate(RetryOnStatus::transient_client_errors())
///     .backoff(ExponentialBackoff::new().cap(Duration::from_secs(4)))
///     .build();
/// assert_eq!(client.retry_budget(), 3);
/// ```
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    retry_budget: u32,
    retry_predicate: Arc<dyn RetryPredicate>,
    backoff: Arc<dyn BackoffPolicy>,
    drain_limit: usize,
    drain_timeout: Duration,
}

impl ClientBuilder {
    /// Starts from the default policies around `transport`, usually a [`reqwest::Client`].
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport,
    {
        Self::with_arc_transport(Arc::new(transport))
    }

    /// Same as [`new`](Self::new) for a transport that is already shared.
    pub fn with_arc_transport(transport: Arc<dyn Transport>) -> Self {
        ClientBuilder {
            transport,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_predicate: Arc::new(DefaultRetryPredicate),
            backoff: Arc::new(ExponentialBackoff::new()),
            drain_limit: DEFAULT_DRAIN_LIMIT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// This method allows creating a ClientBuilder
    /// from an existing ResilientClient instance
    pub fn from_client(client: ResilientClient) -> Self {
        Self {
            transport: client.transport,
            retry_budget: client.retry_budget,
            retry_predicate: client.retry_predicate,
            backoff: client.backoff,
            drain_limit: client.drain_limit,
            drain_timeout: client.drain_timeout,
        }
    }

    /// Swaps the transport, keeping the rest of the configuration.
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport,
    {
        self.transport = Arc::new(transport);
        self
    }

    /// Maximum number of attempts per request, the first one included.
    ///
    /// A budget of `0` is treated as `1`: every request is attempted at least once.
    pub fn retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Convenience method to set the retry predicate.
    ///
    /// If you need to keep a reference to the predicate, use [`with_arc_retry_predicate`].
    ///
    /// [`with_arc_retry_predicate`]: Self::with_arc_retry_predicate
    pub fn retry_predicate<P>(self, predicate: P) -> Self
    where
        P: RetryPredicate,
    {
        self.with_arc_retry_predicate(Arc::new(predicate))
    }

    pub fn with_arc_retry_predicate(mut self, predicate: Arc<dyn RetryPredicate>) -> Self {
        self.retry_predicate = predicate;
        self
    }

    /// Convenience method to set the backoff policy.
    ///
    /// If you need to keep a reference to the policy, use [`with_arc_backoff`].
    ///
    /// [`with_arc_backoff`]: Self::with_arc_backoff
    pub fn backoff<B>(self, backoff: B) -> Self
    where
        B: BackoffPolicy,
    {
        self.with_arc_backoff(Arc::new(backoff))
    }

    pub fn with_arc_backoff(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Maximum number of body bytes read from a discarded response so its connection can go back
    /// to the pool. `0` drops discarded responses without reading them.
    pub fn drain_limit(mut self, bytes: usize) -> Self {
        self.drain_limit = bytes;
        self
    }

    /// Longest time spent draining a discarded response. A body still streaming by then is
    /// dropped along with its connection.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Returns a `ResilientClient` using this builder configuration.
    pub fn build(self) -> ResilientClient {
        let retry_budget = if self.retry_budget == 0 {
            tracing::warn!("retry budget of 0 would never send a request, using 1");
            1
        } else {
            self.retry_budget
        };
        ResilientClient {
            transport: self.transport,
            retry_budget,
            retry_predicate: self.retry_predicate,
            backoff: self.backoff,
            drain_limit: self.drain_limit,
            drain_timeout: self.drain_timeout,
        }
    }
}

/// `ResilientClient` sends requests through a [`Transport`] and retries transient failures.
///
/// The configuration is immutable once built. Cloning is cheap and clones share the transport
/// and policies, so one client can serve many concurrent requests.
#[derive(Clone)]
pub struct ResilientClient {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) retry_budget: u32,
    pub(crate) retry_predicate: Arc<dyn RetryPredicate>,
    pub(crate) backoff: Arc<dyn BackoffPolicy>,
    pub(crate) drain_limit: usize,
    pub(crate) drain_timeout: Duration,
}

impl ResilientClient {
    /// The default configuration: a reqwest transport with standard timeouts, 4 attempts, retries
    /// on 5xx and exponential backoff with jitter.
    ///
    /// Each call returns a fresh, independent client.
    ///
    /// # Errors
    ///
    /// Fails if the underlying reqwest client cannot be initialised.
    pub fn try_new() -> Result<Self> {
        Ok(ClientBuilder::new(default_transport()?).build())
    }

    /// See [`ClientBuilder`] for a more ergonomic way to build `ResilientClient` instances.
    pub fn builder<T>(transport: T) -> ClientBuilder
    where
        T: Transport,
    {
        ClientBuilder::new(transport)
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    /// Convenience method to make a `GET` request to a URL.
    ///
    /// # Errors
    ///
    /// Sending fails whenever the supplied URL cannot be parsed.
    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Convenience method to make a `POST` request to a URL.
    ///
    /// # Errors
    ///
    /// Sending fails whenever the supplied URL cannot be parsed.
    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Convenience method to make a `PUT` request to a URL.
    ///
    /// # Errors
    ///
    /// Sending fails whenever the supplied URL cannot be parsed.
    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// Convenience method to make a `PATCH` request to a URL.
    ///
    /// # Errors
    ///
    /// Sending fails whenever the supplied URL cannot be parsed.
    pub fn patch<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Convenience method to make a `DELETE` request to a URL.
    ///
    /// # Errors
    ///
    /// Sending fails whenever the supplied URL cannot be parsed.
    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Convenience method to make a `HEAD` request to a URL.
    ///
    /// # Errors
    ///
    /// Sending fails whenever the supplied URL cannot be parsed.
    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    /// Start building a `Request` with the `Method` and `Url`.
    ///
    /// Returns a `RequestBuilder`, which will allow setting headers and
    /// the request body before sending.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            request: Request::new(method, url, None),
        }
    }

    /// Executes a `Request`, retrying transient failures.
    ///
    /// Returns the first response the retry predicate accepts. Responses that are retried are
    /// released before the next attempt.
    ///
    /// # Errors
    ///
    /// - [`Error::RetryExhausted`] when every attempt failed, or a server error was not
    ///   retryable. It carries the final response, if the last attempt produced one.
    /// - [`Error::Cancelled`] when the request's cancellation token fired.
    /// - [`Error::Reqwest`] for failures that happen before anything is sent.
    pub async fn execute(&self, req: Request) -> Result<Response> {
        self.execute_with_retry(req).await
    }
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // skipping the transport and policies, they are trait objects
        f.debug_struct("ResilientClient")
            .field("retry_budget", &self.retry_budget)
            .field("drain_limit", &self.drain_limit)
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

/// Sends a `GET` request to `url` with the default configuration.
///
/// ```no_run
/// # async fn run() -> Result<(), resilient_http::Error> {
/// let response = resilient_http::get("http://localhost:8001/goals-list").await?;
/// println!("{}", response.text().await?);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// See [`ResilientClient::execute`]. Also fails with [`Error::Construction`] if `url` is not a
/// valid absolute `http`/`https` URL.
pub async fn get<U: AsRef<str>>(url: U) -> Result<Response> {
    let client = ResilientClient::try_new()?;
    let request = Request::new(Method::GET, url, None)?;
    client.execute(request).await
}

/// A builder for a [`Request`] bound to a [`ResilientClient`].
///
/// Invalid input (bad URL, header name or value) is remembered and reported by
/// [`build`](Self::build) or [`send`](Self::send).
#[must_use = "RequestBuilder does nothing until you 'send' it"]
pub struct RequestBuilder {
    client: ResilientClient,
    request: Result<Request>,
}

impl RequestBuilder {
    /// Assemble a builder starting from an existing `ResilientClient` and a `Request`.
    pub fn from_parts(client: ResilientClient, request: Request) -> RequestBuilder {
        RequestBuilder {
            client,
            request: Ok(request),
        }
    }

    fn map_request<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Request) -> Result<Request>,
    {
        self.request = self.request.and_then(f);
        self
    }

    /// Add a `Header` to this Request.
    pub fn header<K, V>(self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.map_request(|mut req| {
            let name = HeaderName::try_from(key).map_err(|e| construction(e.into()))?;
            let value = HeaderValue::try_from(value).map_err(|e| construction(e.into()))?;
            req.headers_mut().append(name, value);
            Ok(req)
        })
    }

    /// Add a set of Headers to the existing ones on this Request.
    ///
    /// The headers will be merged in to any already set.
    pub fn headers(self, headers: HeaderMap) -> Self {
        self.map_request(|mut req| {
            req.headers_mut().extend(headers);
            Ok(req)
        })
    }

    /// Enable HTTP bearer authentication.
    pub fn bearer_auth<T>(self, token: T) -> Self
    where
        T: Display,
    {
        self.map_request(|mut req| {
            let mut value = HeaderValue::try_from(format!("Bearer {token}"))
                .map_err(|e| construction(e.into()))?;
            value.set_sensitive(true);
            req.headers_mut().insert(reqwest::header::AUTHORIZATION, value);
            Ok(req)
        })
    }

    /// Set the request body.
    ///
    /// Buffered bodies are replayed on every attempt. A streaming body is only sent once; use
    /// [`body_source`](Self::body_source) to retry those.
    pub fn body<T: Into<Body>>(self, body: T) -> Self {
        self.map_request(|mut req| {
            req.set_body(Some(body.into()));
            Ok(req)
        })
    }

    /// Set a function that creates the body afresh for every attempt.
    pub fn body_source<F>(self, source: F) -> Self
    where
        F: Fn() -> Body + Send + Sync + 'static,
    {
        self.map_request(|req| Ok(req.with_body_source(source)))
    }

    /// Enables a per-attempt timeout.
    ///
    /// The timeout is applied from when the attempt starts connecting until the
    /// response body has finished. It overrides the transport's timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.map_request(|mut req| {
            *req.timeout_mut() = Some(timeout);
            Ok(req)
        })
    }

    /// Aborts the request, including a pending backoff pause, once `token` is cancelled.
    pub fn cancellation(self, token: CancellationToken) -> Self {
        self.map_request(|req| Ok(req.cancel_with(token)))
    }

    /// Build a `Request`, which can be inspected, modified and executed with
    /// `ResilientClient::execute()`.
    pub fn build(self) -> Result<Request> {
        self.request
    }

    /// Build a `Request`, which can be inspected, modified and executed with
    /// `ResilientClient::execute()`.
    ///
    /// This is similar to [`RequestBuilder::build()`], but also returns the
    /// embedded `ResilientClient`.
    pub fn build_split(self) -> (ResilientClient, Result<Request>) {
        (self.client, self.request)
    }

    /// Constructs the Request and sends it to the target URL, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Construction errors are reported without sending anything; see
    /// [`ResilientClient::execute`] for the rest.
    pub async fn send(self) -> Result<Response> {
        let (client, req) = self.build_split();
        client.execute(req?).await
    }

    /// Attempt to clone the RequestBuilder.
    ///
    /// `None` is returned if the RequestBuilder can not be cloned,
    /// i.e. if the request body is a stream without a body source.
    pub fn try_clone(&self) -> Option<Self> {
        let request = match &self.request {
            Ok(req) => Ok(req.try_clone()?),
            Err(_) => return None,
        };
        Some(RequestBuilder {
            client: self.client.clone(),
            request,
        })
    }
}

fn construction(err: http::Error) -> Error {
    Error::construction(err)
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
