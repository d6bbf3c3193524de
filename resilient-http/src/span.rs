use reqwest::Response;
use tracing::field::Empty;
use tracing::Span;

use crate::error::{Error, Result};
use crate::request::Request;

/// Opens the span covering every attempt of one logical request.
///
/// `retry.attempts`, `http.status_code` and `error.message` are filled in as the request
/// progresses.
pub(crate) fn request_span(req: &Request, budget: u32) -> Span {
    let url = req.url();
    tracing::info_span!(
        "HTTP request",
        http.method = %req.method(),
        http.scheme = %url.scheme(),
        http.host = %url.host_str().unwrap_or(""),
        net.host.port = url.port_or_known_default().unwrap_or(0),
        url.path = %url.path(),
        otel.kind = "client",
        retry.budget = budget,
        retry.attempts = Empty,
        http.status_code = Empty,
        error.message = Empty,
    )
}

pub(crate) fn record_attempt(span: &Span, attempt: u32) {
    span.record("retry.attempts", attempt);
}

pub(crate) fn record_outcome(span: &Span, outcome: &Result<Response>) {
    match outcome {
        Ok(response) => {
            span.record("http.status_code", response.status().as_u16());
        }
        Err(err) => {
            if let Some(status) = err.status() {
                span.record("http.status_code", status.as_u16());
            }
            span.record("error.message", tracing::field::display(err));
            if let Error::RetryExhausted(exhausted) = err {
                span.record("retry.attempts", exhausted.attempts());
            }
        }
    }
}
