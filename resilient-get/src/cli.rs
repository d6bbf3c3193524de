//! Command line surface of `resilient-get`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use reqwest::{Client, Method, StatusCode};
use resilient_http::{
    ClientBuilder, ExponentialBackoff, RequestBuilder, ResilientClient, RetryOnStatus,
    DEFAULT_CONNECT_TIMEOUT,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Issue one HTTP request, retrying server errors with exponential backoff.
#[derive(Debug, Parser)]
#[command(name = "resilient-get")]
#[command(about = "Fetch a URL with automatic retries and print the response body", long_about = None)]
pub struct Cli {
    /// Absolute http:// or https:// URL.
    pub url: String,

    /// HTTP method.
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    pub method: Method,

    /// Extra request header as "Name: value". May be repeated.
    #[arg(short = 'H', long = "header", value_name = "HEADER", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body, sent unchanged on every attempt.
    #[arg(short = 'd', long)]
    pub data: Option<String>,

    /// Maximum number of attempts, including the first one.
    #[arg(long, default_value_t = resilient_http::DEFAULT_RETRY_BUDGET, value_name = "N")]
    pub retries: u32,

    /// Base delay of the exponential backoff.
    #[arg(long, default_value_t = 1000, value_name = "MS")]
    pub base_delay_ms: u64,

    /// Upper bound of the backoff delay before jitter.
    #[arg(long, default_value_t = 16000, value_name = "MS")]
    pub max_delay_ms: u64,

    /// Random extra delay, as a fraction of the computed delay.
    #[arg(long, default_value_t = ExponentialBackoff::DEFAULT_JITTER)]
    pub jitter: f64,

    /// Timeout of a single attempt.
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub timeout_secs: u64,

    /// Also retry this status code. May be repeated.
    #[arg(long = "retry-on", value_name = "STATUS", value_parser = parse_status)]
    pub retry_on: Vec<StatusCode>,

    /// Seed the jitter for reproducible delays.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    pub fn backoff(&self) -> ExponentialBackoff {
        let backoff = match self.seed {
            Some(seed) => ExponentialBackoff::with_seed(seed),
            None => ExponentialBackoff::new(),
        };
        backoff
            .base(Duration::from_millis(self.base_delay_ms))
            .cap(Duration::from_millis(self.max_delay_ms))
            .jitter(self.jitter)
    }

    pub fn client(&self) -> Result<ResilientClient> {
        let transport = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .context("failed to build the HTTP client")?;

        Ok(ClientBuilder::new(transport)
            .retry_budget(self.retries)
            .retry_predicate(RetryOnStatus::new(self.retry_on.iter().copied()))
            .backoff(self.backoff())
            .build())
    }

    pub fn request(&self, client: &ResilientClient, token: CancellationToken) -> RequestBuilder {
        let mut builder = client
            .request(self.method.clone(), &self.url)
            .cancellation(token);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(data) = &self.data {
            builder = builder.body(data.clone());
        }
        builder
    }
}

fn parse_method(s: &str) -> Result<Method> {
    Method::from_bytes(s.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid HTTP method `{s}`"))
}

fn parse_header(s: &str) -> Result<(String, String)> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected \"Name: value\", got `{s}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("header name is empty in `{s}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_status(s: &str) -> Result<StatusCode> {
    let code: u16 = s.parse().with_context(|| format!("invalid status code `{s}`"))?;
    StatusCode::from_u16(code).with_context(|| format!("invalid status code `{s}`"))
}
