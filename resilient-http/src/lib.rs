//! This crate provides [`ResilientClient`], a wrapper around [`reqwest::Client`] that retries
//! requests failing with transient server errors, pausing with exponential backoff between
//! attempts.
//!
//! Build a client with [`ClientBuilder`], choosing the retry budget, the [`RetryPredicate`] that
//! decides which responses are retried and the [`BackoffPolicy`] that spaces attempts apart. From
//! then on requests are sent much like with reqwest:
//!
//! ```
//! use reqwest::Client;
//! use resilient_http::{ClientBuilder, ExponentialBackoff, RetryOnStatus};
//!
//! async fn run() -> Result<(), resilient_http::Error> {
//!     let client = ClientBuilder::new(Client::new())
//!         .retry_budget(4)
//!         .retry_predicate(RetryOnStatus::transient_client_errors())
//!         .backoff(ExponentialBackoff::new())
//!         .build();
//!     let resp = client.get("http://localhost:8001/goals-list").send().await?;
//!     println!("goals: {}", resp.text().await?);
//!     Ok(())
//! }
//! ```
//!
//! Server errors (5xx) and failures that produced no response are retried until the budget is
//! used up, at which point [`Error::RetryExhausted`] reports the budget and the last status seen.
//! Client errors (4xx) are returned straight away. A request can carry a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) that interrupts both an in-flight
//! attempt and a backoff pause.
//!
//! For one-off calls, [`get`] uses the default configuration.
mod backoff;
mod client;
mod error;
mod predicate;
mod request;
mod retry;
mod retryable;
mod span;
mod transport;

pub use backoff::{BackoffPolicy, ConstantBackoff, ExponentialBackoff};
pub use client::{
    get, ClientBuilder, RequestBuilder, ResilientClient, DEFAULT_DRAIN_LIMIT, DEFAULT_DRAIN_TIMEOUT,
    DEFAULT_RETRY_BUDGET,
};
pub use error::{Error, Result, RetryExhausted};
pub use predicate::{DefaultRetryPredicate, RetryOnStatus, RetryPredicate};
pub use request::{BodySource, Request};
pub use retryable::Retryable;
pub use transport::{
    default_transport, Transport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
