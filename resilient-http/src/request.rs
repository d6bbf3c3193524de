use anyhow::anyhow;
use reqwest::header::HeaderMap;
use reqwest::{Body, Method, Url};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Re-creates the request body for every attempt.
pub type BodySource = Arc<dyn Fn() -> Body + Send + Sync>;

/// A replayable description of one outgoing call.
///
/// Wraps a [`reqwest::Request`] together with an optional cancellation token and an optional
/// [`BodySource`]. Buffered bodies (bytes, strings) are copied for each attempt. A streaming body
/// is consumed by the first attempt; to retry such requests supply a body source with
/// [`Request::with_body_source`].
///
/// ```
/// use reqwest::Method;
/// use resilient_http::Request;
/// use tokio_util::sync::CancellationToken;
///
/// let plain = Request::new(Method::GET, "http://localhost:8001/goals-list", None).unwrap();
/// assert_eq!(plain.method(), &Method::GET);
///
/// let token = CancellationToken::new();
/// let url = "http://localhost:8001/goals";
/// let cancellable =
///     Request::with_cancellation(token.clone(), "POST", url, Some("{}".into())).unwrap();
/// assert!(cancellable.cancellation().is_some());
///
/// assert!(Request::new("GET", "not a url", None).is_err());
/// assert!(Request::new("BAD METHOD", "http://localhost", None).is_err());
/// ```
pub struct Request {
    inner: reqwest::Request,
    body_source: Option<BodySource>,
    cancellation: Option<CancellationToken>,
}

impl Request {
    /// Validates `method` and `url` and builds a request with an optional body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Construction`] if the method is not a valid HTTP token, or the URL cannot be
    /// parsed or is not `http`/`https`.
    pub fn new<M, U>(method: M, url: U, body: Option<Body>) -> Result<Self>
    where
        M: TryInto<Method>,
        M::Error: Into<http::Error>,
        U: AsRef<str>,
    {
        let method = method.try_into().map_err(|e| {
            let e: http::Error = e.into();
            Error::construction(e)
        })?;
        let url = parse_url(url.as_ref())?;
        let mut inner = reqwest::Request::new(method, url);
        *inner.body_mut() = body;
        Ok(Self::from(inner))
    }

    /// Same as [`Request::new`], with a token that aborts the in-flight attempt or backoff pause
    /// when cancelled.
    pub fn with_cancellation<M, U>(
        token: CancellationToken,
        method: M,
        url: U,
        body: Option<Body>,
    ) -> Result<Self>
    where
        M: TryInto<Method>,
        M::Error: Into<http::Error>,
        U: AsRef<str>,
    {
        Ok(Self::new(method, url, body)?.cancel_with(token))
    }

    /// Attaches a cancellation token, replacing any previous one.
    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Uses `source` to produce a fresh body for each attempt.
    pub fn with_body_source<F>(mut self, source: F) -> Self
    where
        F: Fn() -> Body + Send + Sync + 'static,
    {
        *self.inner.body_mut() = Some(source());
        self.body_source = Some(Arc::new(source));
        self
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    pub fn body(&self) -> Option<&Body> {
        self.inner.body()
    }

    /// Replaces the body, dropping any body source set before.
    pub fn set_body(&mut self, body: Option<Body>) {
        *self.inner.body_mut() = body;
        self.body_source = None;
    }

    pub fn timeout(&self) -> Option<&Duration> {
        self.inner.timeout()
    }

    /// Per-attempt timeout, overriding the transport's default.
    pub fn timeout_mut(&mut self) -> &mut Option<Duration> {
        self.inner.timeout_mut()
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// The wrapped transport-level request.
    pub fn inner(&self) -> &reqwest::Request {
        &self.inner
    }

    pub fn into_inner(self) -> reqwest::Request {
        self.inner
    }

    /// Returns true if another attempt can be made after this one consumed its body.
    pub fn is_replayable(&self) -> bool {
        self.body_source.is_some() || self.inner.try_clone().is_some()
    }

    /// Produces an independent copy for one attempt, leaving `self` usable for the next.
    ///
    /// Returns `None` for a streaming body without a body source.
    pub(crate) fn replay(&self) -> Option<reqwest::Request> {
        match &self.body_source {
            Some(source) => {
                let mut req = reqwest::Request::new(self.method().clone(), self.url().clone());
                *req.headers_mut() = self.headers().clone();
                *req.timeout_mut() = self.timeout().copied();
                *req.version_mut() = self.inner.version();
                *req.body_mut() = Some(source());
                Some(req)
            }
            None => self.inner.try_clone(),
        }
    }

    /// Clones the request, including its cancellation token.
    ///
    /// `None` is returned if the body is a stream without a body source.
    pub fn try_clone(&self) -> Option<Self> {
        self.replay().map(|inner| Request {
            inner,
            body_source: self.body_source.clone(),
            cancellation: self.cancellation.clone(),
        })
    }
}

/// Parses an absolute `http` or `https` URL.
pub(crate) fn parse_url(url: &str) -> Result<Url> {
    let url = Url::parse(url).map_err(Error::construction)?;
    if matches!(url.scheme(), "http" | "https") {
        Ok(url)
    } else {
        Err(Error::Construction(anyhow!(
            "unsupported URL scheme `{}` in {}",
            url.scheme(),
            url
        )))
    }
}

impl From<reqwest::Request> for Request {
    fn from(inner: reqwest::Request) -> Self {
        Request {
            inner,
            body_source: None,
            cancellation: None,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("inner", &self.inner)
            .field("body_source", &self.body_source.is_some())
            .field("cancellation", &self.cancellation)
            .finish()
    }
}
