//! FetchWrapper integration tests against a loopback HTTP server.
//!
//! Covers response classification and how each outcome feeds the governor:
//! - 429 and throttle-marker bodies retry and raise backoff
//! - 404 / 401 return immediately
//! - 5xx and transport failures retry until exhausted

mod common;

use common::mock_http::MockHttpServer;
use common::{fast_governor, fast_wrapper};
use mdsync_core::ProviderId;
use mdsync_provider::{FetchOutcome, FetchWrapper, RetryPolicy};
use std::time::Duration;
use tokio_test::assert_ok;

const P: ProviderId = ProviderId::new("fetch_test");

#[tokio::test]
async fn test_success_returns_body() {
    let server = MockHttpServer::start().await;
    server.script("/ok", vec![(200, r#"{"ok":true}"#)]);
    let wrapper = fast_wrapper(P);

    let outcome = wrapper.get(&format!("{}/ok", server.url()), &[]).await;
    assert_eq!(outcome, FetchOutcome::Body(r#"{"ok":true}"#.to_string()));
    let snapshot = wrapper.governor().snapshot();
    assert_eq!(snapshot.calls, 1);
    assert_eq!(snapshot.successes, 1);
    server.shutdown();
}

#[tokio::test]
async fn test_throttle_then_success_retries() {
    let server = MockHttpServer::start().await;
    server.script("/limited", vec![(429, ""), (200, "data")]);
    let wrapper = fast_wrapper(P);

    let outcome = wrapper.get(&format!("{}/limited", server.url()), &[]).await;
    assert_eq!(outcome.into_body().as_deref(), Some("data"));
    assert_eq!(server.hits("/limited"), 2);

    let snapshot = wrapper.governor().snapshot();
    assert_eq!(snapshot.throttled, 1);
    assert_eq!(snapshot.successes, 1);
    // One throttle raised backoff from zero; one success does not lower it.
    assert_eq!(wrapper.governor().backoff(), Duration::from_millis(5));
    server.shutdown();
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockHttpServer::start().await;
    let wrapper = fast_wrapper(P);

    let outcome = wrapper.get(&format!("{}/missing", server.url()), &[]).await;
    assert_eq!(outcome, FetchOutcome::NotFound);
    assert_eq!(server.hits("/missing"), 1);
    assert_eq!(wrapper.governor().snapshot().not_found, 1);
    server.shutdown();
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let server = MockHttpServer::start().await;
    server.script("/secret", vec![(401, "bad key")]);
    server.script("/forbidden", vec![(403, "nope")]);
    let wrapper = fast_wrapper(P);

    let outcome = wrapper.get(&format!("{}/secret", server.url()), &[]).await;
    assert_eq!(outcome, FetchOutcome::Unauthorized);
    let outcome = wrapper.get(&format!("{}/forbidden", server.url()), &[]).await;
    assert_eq!(outcome, FetchOutcome::Unauthorized);
    assert_eq!(server.hits("/secret"), 1);
    assert_eq!(server.hits("/forbidden"), 1);
    server.shutdown();
}

#[tokio::test]
async fn test_server_errors_exhaust_retries() {
    let server = MockHttpServer::start().await;
    server.script("/broken", vec![(503, "down")]);
    let wrapper = fast_wrapper(P);

    let outcome = wrapper.get(&format!("{}/broken", server.url()), &[]).await;
    assert_eq!(outcome, FetchOutcome::Exhausted);
    assert_eq!(server.hits("/broken"), 3);

    let snapshot = wrapper.governor().snapshot();
    assert_eq!(snapshot.errors, 3);
    // Errors never touch the adaptive backoff.
    assert_eq!(wrapper.governor().backoff(), Duration::ZERO);
    server.shutdown();
}

#[tokio::test]
async fn test_throttle_marker_body_counts_as_throttle() {
    let server = MockHttpServer::start().await;
    server.script(
        "/query",
        vec![
            (200, r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#),
            (200, "timestamp,open\n2024-03-01,1.0\n"),
        ],
    );
    let wrapper = fast_wrapper(P).with_throttle_markers(&["\"Note\""]);

    let outcome = wrapper.get(&format!("{}/query", server.url()), &[]).await;
    assert!(outcome.into_body().unwrap().starts_with("timestamp"));
    assert_eq!(wrapper.governor().snapshot().throttled, 1);
    server.shutdown();
}

#[tokio::test]
async fn test_transport_error_exhausts() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let wrapper = assert_ok!(FetchWrapper::new(
        fast_governor(P),
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(2),
        },
    ));

    let outcome = wrapper.get(&format!("http://{addr}/x"), &[]).await;
    assert_eq!(outcome, FetchOutcome::Exhausted);
    assert_eq!(wrapper.governor().snapshot().errors, 2);
}

#[tokio::test]
async fn test_query_parameters_are_sent() {
    let server = MockHttpServer::start().await;
    server.script("/q", vec![(200, "ok")]);
    let wrapper = fast_wrapper(P);

    wrapper
        .get(
            &format!("{}/q", server.url()),
            &[("symbol", "XYZ".to_string()), ("token", "k".to_string())],
        )
        .await;
    assert_eq!(server.requests(), vec!["/q?symbol=XYZ&token=k".to_string()]);
    server.shutdown();
}
