use paste::paste;
use reqwest::{Client, StatusCode};
use resilient_http::{ClientBuilder, Error, ResilientClient, RetryOnStatus};
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use wiremock::{
    matchers::{body_string, method, path},
    Mock, MockServer, Respond, ResponseTemplate,
};

use crate::helpers::{capture_logs, init_tracing, CountingBackoff};

/// Answers with `status` for the first `failures` calls, then with `200 OK`.
pub struct RetryResponder(Arc<AtomicU32>, u32, u16);

impl RetryResponder {
    fn new(failures: u32, status_code: u16) -> Self {
        Self(Arc::new(AtomicU32::new(0)), failures, status_code)
    }
}

impl Respond for RetryResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let calls = self.0.fetch_add(1, Ordering::SeqCst) + 1;

        if calls > self.1 {
            ResponseTemplate::new(200).set_body_string("recovered")
        } else {
            ResponseTemplate::new(self.2).set_body_string("still down")
        }
    }
}

fn client_with(budget: u32, backoff: CountingBackoff) -> ResilientClient {
    init_tracing();
    ClientBuilder::new(Client::builder().build().unwrap())
        .retry_budget(budget)
        .backoff(backoff)
        .build()
}

macro_rules! assert_retry_succeeds_inner {
    ($x:tt, $name:ident, $status:expr, $budget:tt, $exact:tt, $backoffs:tt, $responder:expr) => {
        #[tokio::test]
        async fn $name() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/foo"))
                .respond_with($responder)
                .expect($exact)
                .mount(&server)
                .await;

            let backoff = CountingBackoff::new();
            let client = client_with($budget, backoff.clone());

            let resp = client
                .get(format!("{}/foo", server.uri()))
                .send()
                .await
                .expect("call failed");

            assert_eq!(resp.status(), $status);
            assert_eq!(backoff.invocations(), $backoffs);
        }
    };
}

macro_rules! assert_retry_succeeds {
    ($x:tt, $status:expr) => {
        paste! {
            assert_retry_succeeds_inner!($x, [<assert_retry_succeeds_on_ $x>], $status, 3, 3, 2, RetryResponder::new(2, $x));
        }
    };
}

macro_rules! assert_no_retry {
    ($x:tt, $status:expr) => {
        paste! {
            assert_retry_succeeds_inner!($x, [<assert_no_retry_on_ $x>], $status, 3, 1, 0, ResponseTemplate::new($x));
        }
    };
}

// 2xx.
assert_no_retry!(200, StatusCode::OK);
assert_no_retry!(201, StatusCode::CREATED);
assert_no_retry!(204, StatusCode::NO_CONTENT);

// 3xx.
assert_no_retry!(304, StatusCode::NOT_MODIFIED);

// 4xx, including the ones other clients like to retry.
assert_no_retry!(400, StatusCode::BAD_REQUEST);
assert_no_retry!(401, StatusCode::UNAUTHORIZED);
assert_no_retry!(404, StatusCode::NOT_FOUND);
assert_no_retry!(408, StatusCode::REQUEST_TIMEOUT);
assert_no_retry!(409, StatusCode::CONFLICT);
assert_no_retry!(429, StatusCode::TOO_MANY_REQUESTS);

// 5xx.
assert_retry_succeeds!(500, StatusCode::OK);
assert_retry_succeeds!(501, StatusCode::OK);
assert_retry_succeeds!(502, StatusCode::OK);
assert_retry_succeeds!(503, StatusCode::OK);
assert_retry_succeeds!(504, StatusCode::OK);
assert_retry_succeeds!(511, StatusCode::OK);

#[tokio::test]
async fn recovers_after_two_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/goals-list"))
        .respond_with(RetryResponder::new(2, 500))
        .expect(3)
        .mount(&server)
        .await;

    let backoff = CountingBackoff::new();
    let client = client_with(4, backoff.clone());

    let resp = client
        .get(format!("{}/goals-list", server.uri()))
        .send()
        .await
        .expect("call failed");

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "recovered");
    assert_eq!(backoff.attempts(), vec![1, 2]);
}

#[tokio::test]
async fn exhausts_the_budget_on_persistent_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("still down"))
        .expect(2)
        .mount(&server)
        .await;

    let backoff = CountingBackoff::new();
    let client = client_with(2, backoff.clone());

    let err = client
        .get(server.uri())
        .send()
        .await
        .expect_err("budget should run out");

    assert_eq!(backoff.attempts(), vec![1]);
    assert_eq!(
        err.to_string(),
        "request failed after 2 of 2 attempts: last status=503"
    );
    let exhausted = match err {
        Error::RetryExhausted(exhausted) => exhausted,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(exhausted.budget(), 2);
    assert_eq!(exhausted.attempts(), 2);
    assert_eq!(exhausted.last_status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert!(exhausted.last_error().is_none());

    // The last response is kept so it can still be inspected.
    let last = exhausted.into_response().expect("last response");
    assert_eq!(last.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(last.text().await.unwrap(), "still down");
}

#[tokio::test]
async fn single_attempt_budget_never_backs_off() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let backoff = CountingBackoff::new();
    let client = client_with(1, backoff.clone());

    let err = client.get(server.uri()).send().await.unwrap_err();

    assert!(err.is_retry_exhausted());
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(backoff.invocations(), 0);
}

#[tokio::test]
async fn zero_budget_still_makes_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_with(0, CountingBackoff::new());

    let resp = client.get(server.uri()).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn server_errors_the_predicate_declines_end_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(501))
        .expect(1)
        .mount(&server)
        .await;

    let backoff = CountingBackoff::new();
    let client = ClientBuilder::new(Client::new())
        .retry_budget(4)
        .retry_predicate(|status: StatusCode| status == StatusCode::SERVICE_UNAVAILABLE)
        .backoff(backoff.clone())
        .build();

    let err = client.get(server.uri()).send().await.unwrap_err();

    let exhausted = match err {
        Error::RetryExhausted(exhausted) => exhausted,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(exhausted.attempts(), 1);
    assert_eq!(exhausted.last_status(), Some(StatusCode::NOT_IMPLEMENTED));
    assert_eq!(backoff.invocations(), 0);
}

#[tokio::test]
async fn declined_server_errors_are_not_reported_as_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(501))
        .expect(1)
        .mount(&server)
        .await;

    let client = ClientBuilder::new(Client::new())
        .retry_budget(4)
        .retry_predicate(|status: StatusCode| status == StatusCode::SERVICE_UNAVAILABLE)
        .backoff(CountingBackoff::new())
        .build();

    let (_guard, logs) = capture_logs();
    let err = client.get(server.uri()).send().await.unwrap_err();
    assert!(err.is_retry_exhausted());

    let logs = logs.contents();
    assert!(
        logs.contains("server error is not retryable, giving up"),
        "{logs}"
    );
    assert!(!logs.contains("all retries failed"), "{logs}");
}

#[tokio::test]
async fn used_up_budget_is_reported_as_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = ClientBuilder::new(Client::new())
        .retry_budget(2)
        .backoff(CountingBackoff::new())
        .build();

    let (_guard, logs) = capture_logs();
    client.get(server.uri()).send().await.unwrap_err();

    let logs = logs.contents();
    assert!(logs.contains("all retries failed"), "{logs}");
    assert!(!logs.contains("giving up"), "{logs}");
}

#[tokio::test]
async fn custom_predicate_can_retry_too_many_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(RetryResponder::new(1, 429))
        .expect(2)
        .mount(&server)
        .await;

    let backoff = CountingBackoff::new();
    let client = ClientBuilder::new(Client::new())
        .retry_predicate(RetryOnStatus::new([StatusCode::TOO_MANY_REQUESTS]))
        .backoff(backoff.clone())
        .build();

    let resp = client.get(server.uri()).send().await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(backoff.attempts(), vec![1]);
}

#[tokio::test]
async fn buffered_request_bodies_are_sent_on_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/goals"))
        .and(body_string("payload"))
        .respond_with(RetryResponder::new(2, 502))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_with(4, CountingBackoff::new());

    let resp = client
        .post(format!("{}/goals", server.uri()))
        .header("content-type", "text/plain")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn one_shot_get_uses_the_default_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/goals-list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("response comes here"))
        .expect(1)
        .mount(&server)
        .await;

    let resp = resilient_http::get(format!("{}/goals-list", server.uri()))
        .await
        .unwrap();

    assert_eq!(resp.text().await.unwrap(), "response comes here");
}

#[tokio::test]
async fn one_shot_get_rejects_malformed_urls() {
    let err = resilient_http::get("goals-list").await.unwrap_err();
    assert!(matches!(err, Error::Construction(_)), "{err}");
}

#[tokio::test]
async fn one_client_serves_concurrent_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(8)
        .mount(&server)
        .await;

    let client = client_with(2, CountingBackoff::new());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            let url = format!("{}/item/{}", server.uri(), i);
            tokio::spawn(async move { client.get(url).send().await })
        })
        .collect();

    for handle in handles {
        let resp = handle.await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
