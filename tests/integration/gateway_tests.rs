//! Fetch gateway policy against a mock API

use crate::common::{gateway_for, gateway_with_probe, test_config};
use serde_json::json;
use star_harvest::crawler::{FetchResult, Unavailable};
use star_harvest::CircuitState;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn url(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn test_success_returns_json_with_token_header() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("harvest.db"));
    let (gateway, metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget"))
        .and(header("authorization", "token token-a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let value = gateway.fetch(&url(&server, "/repos/acme/widget")).await;
    assert_eq!(value, Some(json!({ "id": 1 })));
    assert_eq!(metrics.snapshot().requests, 1);
    assert_eq!(metrics.snapshot().retries, 0);
}

#[tokio::test]
async fn test_not_found_and_unprocessable_return_immediately() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("harvest.db"));
    let (gateway, metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .and(path("/repos/acme/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/compare/v1...v2"))
        .respond_with(ResponseTemplate::new(422))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(
        gateway.fetch_result(&url(&server, "/repos/acme/missing")).await,
        FetchResult::Empty { status: 404 }
    );
    assert_eq!(
        gateway
            .fetch_result(&url(&server, "/repos/acme/widget/compare/v1...v2"))
            .await,
        FetchResult::Empty { status: 422 }
    );
    assert_eq!(metrics.snapshot().retries, 0);
    assert_eq!(gateway.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_server_errors_make_at_most_three_attempts() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("harvest.db"));
    let (gateway, metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/releases"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let target = url(&server, "/repos/acme/widget/releases");
    assert_eq!(
        gateway.fetch_result(&target).await,
        FetchResult::Unavailable(Unavailable::RetriesExhausted)
    );
    assert_eq!(metrics.snapshot().requests, 3);
    assert_eq!(metrics.snapshot().retries, 2);
}

#[tokio::test]
async fn test_transient_server_error_recovers() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("harvest.db"));
    let (gateway, _metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/tags"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widget/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let value = gateway.fetch(&url(&server, "/repos/acme/widget/tags")).await;
    assert_eq!(value, Some(json!([])));
}

#[tokio::test]
async fn test_rate_limit_rotates_to_next_credential() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("harvest.db"));
    let (gateway, metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .and(header("authorization", "token token-a"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "4102444800"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("authorization", "token token-b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let value = gateway.fetch(&url(&server, "/repos/acme/widget")).await;
    assert_eq!(value, Some(json!({ "ok": true })));

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.rotations, 1);
    assert_eq!(snapshot.retries, 0);

    let credentials = gateway.credentials().snapshot();
    assert!(credentials[0].exhausted);
    assert!(!credentials[1].exhausted);
}

#[tokio::test]
async fn test_forbidden_with_quota_left_is_client_error() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("harvest.db"));
    let (gateway, metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "4000")
                .set_body_string("Resource not accessible"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = gateway.fetch_result(&url(&server, "/repos/acme/private")).await;
    assert_eq!(
        result,
        FetchResult::ClientError {
            status: 403,
            body: "Resource not accessible".to_string()
        }
    );
    assert_eq!(metrics.snapshot().rotations, 0);
}

#[tokio::test]
async fn test_waits_for_reset_when_no_credential_left() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir.path().join("harvest.db"));
    config.api.tokens = vec!["token-a".to_string()];
    let (gateway, metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let value = gateway.fetch(&url(&server, "/repos/acme/widget/commits")).await;

    assert_eq!(value, Some(json!([1, 2])));
    // Capped by max-rate-limit-wait-secs
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
    assert_eq!(metrics.snapshot().rotations, 0);
    assert!(!gateway.credentials().snapshot()[0].exhausted);
}

#[tokio::test]
async fn test_open_circuit_rejects_without_network() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir.path().join("harvest.db"));
    config.fetch.max_retries = 1;
    config.circuit_breaker.failure_threshold = 2;
    let (gateway, _metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let target = url(&server, "/repos/acme/widget");
    for _ in 0..2 {
        assert_eq!(
            gateway.fetch_result(&target).await,
            FetchResult::Unavailable(Unavailable::RetriesExhausted)
        );
    }
    assert_eq!(gateway.breaker().state(), CircuitState::Open);

    assert_eq!(
        gateway.fetch_result(&target).await,
        FetchResult::Unavailable(Unavailable::CircuitOpen)
    );
}

#[tokio::test]
async fn test_open_circuit_sends_no_quota_check() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir.path().join("harvest.db"));
    config.fetch.max_retries = 1;
    config.fetch.check_quota = true;
    config.circuit_breaker.failure_threshold = 2;
    let gateway = gateway_with_probe(&config);

    // The quota endpoint is down along with everything else
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let target = url(&server, "/repos/acme/widget");
    for _ in 0..2 {
        assert_eq!(
            gateway.fetch_result(&target).await,
            FetchResult::Unavailable(Unavailable::RetriesExhausted)
        );
    }
    assert_eq!(gateway.breaker().state(), CircuitState::Open);
    let sent = server.received_requests().await.unwrap().len();

    for _ in 0..5 {
        assert_eq!(
            gateway.fetch_result(&target).await,
            FetchResult::Unavailable(Unavailable::CircuitOpen)
        );
    }
    assert_eq!(server.received_requests().await.unwrap().len(), sent);
}

#[tokio::test]
async fn test_empty_success_body_is_null() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &dir.path().join("harvest.db"));
    let (gateway, _metrics) = gateway_for(&config);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    assert_eq!(
        gateway.fetch_result(&url(&server, "/anything")).await,
        FetchResult::Json(serde_json::Value::Null)
    );
}
