//! The retry loop behind [`ResilientClient::execute`].

use reqwest::header::CONTENT_LENGTH;
use reqwest::{Response, StatusCode};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::client::ResilientClient;
use crate::error::{Error, Result, RetryExhausted};
use crate::request::Request;
use crate::retryable::Retryable;
use crate::span;

impl ResilientClient {
    pub(crate) async fn execute_with_retry(&self, request: Request) -> Result<Response> {
        let request_span = span::request_span(&request, self.retry_budget);
        async move {
            let outcome = self.retry_loop(request).await;
            span::record_outcome(&Span::current(), &outcome);
            outcome
        }
        .instrument(request_span)
        .await
    }

    /// Attempts are numbered from 1. The loop ends on the first response the predicate does not
    /// want retried, on a fatal error, on cancellation, or once the budget is used up.
    ///
    /// Every response that gets discarded is drained and dropped before the backoff pause starts,
    /// so at most one response per request is alive at any time.
    async fn retry_loop(&self, request: Request) -> Result<Response> {
        let budget = self.retry_budget;
        let cancellation = request.cancellation().cloned();
        let token = cancellation.as_ref();

        let mut pending = Some(request);
        let mut attempts = 0;
        let mut last_status: Option<StatusCode> = None;
        let mut last_response: Option<Response> = None;
        let mut last_error: Option<Error> = None;
        let mut declined = false;

        for attempt in 1..=budget {
            let Some(req) = next_attempt(&mut pending, attempt == budget) else {
                break;
            };
            attempts = attempt;
            span::record_attempt(&Span::current(), attempt);
            let is_last = pending.is_none();
            if is_last && attempt < budget {
                tracing::warn!(
                    attempt,
                    budget,
                    "request body cannot be replayed, no further attempts are possible"
                );
            }

            tracing::debug!(attempt, budget, "sending request");
            match cancellable(token, self.transport.execute(req)).await? {
                Ok(response) => {
                    let status = response.status();
                    match Retryable::from_response(&response, self.retry_predicate.as_ref()) {
                        None => {
                            tracing::debug!(attempt, status = status.as_u16(), "got the response");
                            return Ok(response);
                        }
                        Some(Retryable::Fatal) => {
                            tracing::warn!(
                                attempt,
                                status = status.as_u16(),
                                "server error is not retryable"
                            );
                            last_status = Some(status);
                            last_response = Some(response);
                            declined = true;
                            break;
                        }
                        Some(Retryable::Transient) => {
                            last_status = Some(status);
                            if is_last {
                                last_response = Some(response);
                                break;
                            }
                            tracing::warn!(
                                attempt,
                                budget,
                                status = status.as_u16(),
                                "request failed, discarding the response"
                            );
                            self.release(response, token).await?;
                        }
                    }
                }
                Err(err) => match Retryable::from_error(&err) {
                    Retryable::Fatal => {
                        tracing::error!(
                            attempt,
                            error = %err,
                            "request failed and cannot be retried"
                        );
                        return Err(err);
                    }
                    Retryable::Transient => {
                        if is_last {
                            last_error = Some(err);
                            break;
                        }
                        tracing::warn!(
                            attempt,
                            budget,
                            error = %err,
                            "request failed as no response was generated"
                        );
                    }
                },
            }

            self.pause(attempt, token).await?;
        }

        let last_status_code = last_status.map(|status| status.as_u16());
        if declined {
            tracing::error!(
                attempts,
                last_status = last_status_code,
                "server error is not retryable, giving up"
            );
        } else {
            tracing::error!(
                retries = budget,
                attempts,
                last_status = last_status_code,
                "all retries failed"
            );
        }
        Err(RetryExhausted {
            budget,
            attempts,
            last_status,
            response: last_response,
            last_error: last_error.map(Box::new),
        }
        .into())
    }

    /// Drains up to `drain_limit` bytes of a discarded response so the connection can be reused,
    /// then drops it.
    ///
    /// Bodies announcing more than `drain_limit` bytes are dropped unread, as a partial read
    /// cannot return the connection to the pool. The drain gives up after `drain_timeout`, so a
    /// stalled body never holds back the next attempt.
    async fn release(
        &self,
        mut response: Response,
        token: Option<&CancellationToken>,
    ) -> Result<()> {
        let limit = self.drain_limit;
        if limit == 0 {
            return Ok(());
        }
        if let Some(content_length) = declared_length(&response) {
            if content_length > limit as u64 {
                tracing::debug!(
                    content_length,
                    limit,
                    "skipping drain: Content-Length exceeds limit"
                );
                return Ok(());
            }
        }

        let timeout = self.drain_timeout;
        let drain = async move {
            let mut drained = 0usize;
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        drained += chunk.len();
                        if drained >= limit {
                            tracing::debug!(
                                drained,
                                limit,
                                "drain limit reached, dropping the connection"
                            );
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(
                            error = %e,
                            "failed to drain response body before retry; connection may not be reused"
                        );
                        break;
                    }
                }
            }
        };
        if cancellable(token, tokio::time::timeout(timeout, drain))
            .await?
            .is_err()
        {
            tracing::debug!(?timeout, "drain timed out, dropping the connection");
        }
        Ok(())
    }

    async fn pause(&self, attempt: u32, token: Option<&CancellationToken>) -> Result<()> {
        let delay = self.backoff.delay(attempt);
        tracing::info!(attempt, ?delay, "exponential backoff");
        cancellable(token, tokio::time::sleep(delay)).await
    }
}

fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Takes the request for the next attempt, keeping a replayable template around unless this is
/// the last attempt.
fn next_attempt(pending: &mut Option<Request>, last: bool) -> Option<reqwest::Request> {
    if !last {
        if let Some(copy) = pending.as_ref().and_then(Request::replay) {
            return Some(copy);
        }
    }
    pending.take().map(Request::into_inner)
}

/// Races `fut` against the cancellation token, if there is one.
async fn cancellable<F>(token: Option<&CancellationToken>, fut: F) -> Result<F::Output>
where
    F: Future,
{
    match token {
        None => Ok(fut.await),
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::warn!("request cancelled");
                Err(Error::Cancelled)
            }
            output = fut => Ok(output),
        },
    }
}
