//! Wire-level tests for the REST binding against a mock downstream.

use std::sync::Arc;
use std::time::Duration;

use fhirgate_auth::StaticTokenProvider;
use fhirgate_core::{RequestContext, RetryPolicy};
use fhirgate_pipeline::{Binding, BindingError, RestBinding};
use http::{HeaderValue, Method, StatusCode, header};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn binding_for(server: &MockServer) -> RestBinding {
    RestBinding::new(Url::parse(&server.uri()).unwrap())
        .with_retry(RetryPolicy::new(Duration::from_millis(10), 3).unwrap())
        .with_request_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_forwards_request_and_copies_response_back() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Patient/42"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                r#"{"resourceType":"Patient","id":"42"}"#,
                "application/fhir+json",
            ),
        )
        .mount(&server)
        .await;

    let binding = binding_for(&server);
    let mut ctx = RequestContext::new(Method::GET, "/Patient/42".parse().unwrap())
        .with_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer caller"))
        .with_header(header::ACCEPT, HeaderValue::from_static("application/fhir+json"));

    binding.execute(&mut ctx).await.unwrap();

    assert_eq!(ctx.status(), Some(StatusCode::OK));
    assert!(!ctx.is_fatal());
    let body: serde_json::Value = serde_json::from_slice(ctx.body()).unwrap();
    assert_eq!(body["resourceType"], "Patient");
    assert_eq!(
        ctx.headers.get(header::CONTENT_TYPE).unwrap(),
        "application/fhir+json"
    );

    // Caller credentials were stripped before forwarding.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_token_provider_attaches_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/Patient"))
        .and(body_json(json!({"resourceType": "Patient"})))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let binding = binding_for(&server)
        .with_token_provider(Arc::new(StaticTokenProvider::bearer("service-token")));
    let mut ctx = RequestContext::new(Method::POST, "/Patient".parse().unwrap())
        .with_body(r#"{"resourceType":"Patient"}"#);

    binding.execute(&mut ctx).await.unwrap();
    assert_eq!(ctx.status(), Some(StatusCode::CREATED));

    let received = server.received_requests().await.unwrap();
    assert_eq!(
        received[0].headers.get("authorization").unwrap(),
        "Bearer service-token"
    );
}

#[tokio::test]
async fn test_times_out_then_retries_to_success() {
    let server = MockServer::start().await;
    // The first attempt runs into a response slower than the client
    // timeout; the retry hits the instant fallback.
    Mock::given(method("GET"))
        .and(path("/Patient/7"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/Patient/7"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .with_priority(2)
        .mount(&server)
        .await;

    let binding = RestBinding::new(Url::parse(&server.uri()).unwrap())
        .with_retry(RetryPolicy::new(Duration::from_millis(10), 3).unwrap())
        .with_request_timeout(Duration::from_millis(200));
    let mut ctx = RequestContext::new(Method::GET, "/Patient/7".parse().unwrap());

    binding.execute(&mut ctx).await.unwrap();

    assert_eq!(ctx.status(), Some(StatusCode::OK));
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn test_exhaustion_is_fatal_with_gateway_status() {
    // Nothing listens here; every attempt fails at the transport level.
    let binding = RestBinding::new(Url::parse("http://127.0.0.1:9/").unwrap())
        .with_retry(RetryPolicy::new(Duration::from_millis(5), 2).unwrap())
        .with_request_timeout(Duration::from_millis(200));
    let mut ctx = RequestContext::new(Method::GET, "/Patient/1".parse().unwrap())
        .with_body("request payload");

    let error = binding.execute(&mut ctx).await.unwrap_err();

    match &error {
        BindingError::Transport(retry) => {
            assert!(retry.to_string().contains("2 attempt(s)"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    assert!(ctx.is_fatal());
    assert!(matches!(
        ctx.status(),
        Some(StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT)
    ));
    // No partial downstream payload leaks back to the caller.
    assert!(ctx.body().is_empty());
    assert_eq!(ctx.fault().unwrap().stage, "rest");
}

#[tokio::test]
async fn test_non_success_status_is_fatal_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Patient/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let binding = binding_for(&server);
    let mut ctx = RequestContext::new(Method::GET, "/Patient/404".parse().unwrap());

    let error = binding.execute(&mut ctx).await.unwrap_err();
    assert!(matches!(
        error,
        BindingError::DownstreamStatus {
            status: StatusCode::NOT_FOUND
        }
    ));
    assert!(ctx.is_fatal());
    assert_eq!(ctx.status(), Some(StatusCode::NOT_FOUND));
    assert!(ctx.body().is_empty());

    // Only transport failures are retried, statuses are final.
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn test_operation_alias_reaches_downstream_normalized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_operations/export/job-11"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let binding = binding_for(&server);
    // The dollar form of the operation collapses to the bare code.
    let mut ctx = RequestContext::new(Method::GET, "/_operations/$export/job-11".parse().unwrap());

    binding.execute(&mut ctx).await.unwrap();
    assert_eq!(ctx.status(), Some(StatusCode::OK));
}

#[tokio::test]
async fn test_route_prefix_stripped_before_forwarding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Observation"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let binding = binding_for(&server).with_route_prefix("/fhir");
    let mut ctx = RequestContext::new(Method::GET, "/fhir/Observation".parse().unwrap());

    binding.execute(&mut ctx).await.unwrap();
    assert_eq!(ctx.status(), Some(StatusCode::OK));
}
