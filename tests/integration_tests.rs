//! Integration tests using wiremock to simulate upstream servers.

use serde::{Deserialize, Serialize};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use upstream::metadata::RequestMetadata;
use upstream::resolver::Lookup;
use upstream::{BoxFuture, Client, Error, RandomSource, Selection};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TestData {
    id: u32,
    name: String,
}

/// Resolves every domain to the loopback address.
struct LoopbackLookup;

impl Lookup for LoopbackLookup {
    fn lookup_host<'a>(&'a self, _domain: &'a str) -> BoxFuture<'a, io::Result<Vec<IpAddr>>> {
        Box::pin(async { Ok(vec![IpAddr::from([127, 0, 0, 1])]) })
    }
}

/// A loopback address nothing listens on.
fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn authority(server: &MockServer) -> String {
    server.address().to_string()
}

#[tokio::test]
async fn test_successful_get_request() {
    let mock_server = MockServer::start().await;

    let response_data = TestData {
        id: 1,
        name: "Test".to_string(),
    };

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&response_data))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let response = client.get("/test").await.unwrap();

    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.json::<TestData>().unwrap(), response_data);
}

#[tokio::test]
async fn test_post_json_sets_content_type() {
    let mock_server = MockServer::start().await;

    let request_data = TestData {
        id: 0,
        name: "New".to_string(),
    };

    Mock::given(method("POST"))
        .and(path("/test"))
        .and(header("content-type", "application/json; charset=utf-8"))
        .and(body_string(r#"{"id":0,"name":"New"}"#))
        .respond_with(ResponseTemplate::new(201).set_body_json(&request_data))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let response = client.post("/test", &request_data).await.unwrap();
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_form_query_and_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/form"))
        .and(query_param("page", "2"))
        .and(query_param("q", "rust"))
        .and(header("x-client", "tests"))
        .and(header("authorization", "Basic YWxpY2U6c2VjcmV0"))
        .and(header(
            "content-type",
            "application/x-www-form-urlencoded; charset=utf-8",
        ))
        .and(body_string("name=Alice+Smith"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .default_header("x-client", "tests")
        .unwrap()
        .basic_auth("alice", "secret")
        .build()
        .unwrap();

    let metadata = RequestMetadata::new(http::Method::PUT, "/form?page=1")
        .with_query_param("page", "2")
        .with_query_param("q", "rust")
        .with_form([("name", "Alice Smith")]);

    let response = client.call(metadata).await.unwrap();
    assert_eq!(response.status.as_u16(), 204);
}

#[tokio::test]
async fn test_http_error_is_a_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let response = client.get("/missing").await.unwrap();
    assert!(!response.is_success());
    assert_eq!(response.text(), "Not found");

    match response.error_for_status() {
        Err(Error::HttpError {
            status,
            raw_response,
            ..
        }) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(raw_response, "Not found");
        }
        other => panic!("Expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_deserialization_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("invalid json"))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let result = client.get("/test").await.unwrap().json::<TestData>();

    match result {
        Err(Error::DeserializationFailed {
            raw_response,
            serde_error,
            status,
        }) => {
            assert_eq!(status.as_u16(), 200);
            assert_eq!(raw_response, "invalid json");
            assert!(serde_error.contains("expected"));
        }
        _ => panic!("Expected DeserializationFailed, got {:?}", result),
    }
}

#[tokio::test]
async fn test_round_robin_over_base_urls() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;

    for server in [&server_a, &server_b] {
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(server)
            .await;
    }

    let client = Client::builder()
        .base_urls([server_a.uri(), server_b.uri()])
        .unwrap()
        .selection(Selection::RoundRobin)
        .build()
        .unwrap();

    for _ in 0..6 {
        client.get("/ping").await.unwrap();
    }
}

#[tokio::test]
async fn test_random_selection_stays_within_base_urls() {
    let server_a = MockServer::start().await;
    let server_b = MockServer::start().await;

    for server in [&server_a, &server_b] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    let client = Client::builder()
        .base_urls([server_a.uri(), server_b.uri()])
        .unwrap()
        .selection(Selection::Random)
        .random_source(Arc::new(RandomSource::seeded(17)))
        .build()
        .unwrap();

    for _ in 0..20 {
        client.get("/any").await.unwrap();
    }

    let a = server_a.received_requests().await.unwrap().len();
    let b = server_b.received_requests().await.unwrap().len();
    assert_eq!(a + b, 20);
}

#[tokio::test]
async fn test_absolute_uri_bypasses_base_url() {
    let base = MockServer::start().await;
    let other = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/direct"))
        .respond_with(ResponseTemplate::new(200).set_body_string("other"))
        .expect(1)
        .mount(&other)
        .await;

    let client = Client::builder()
        .base_url(base.uri())
        .unwrap()
        .build()
        .unwrap();

    let response = client.get(format!("{}/direct", other.uri())).await.unwrap();
    assert_eq!(response.text(), "other");
    assert!(base.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_balancer_fails_over_dead_upstream() {
    let live = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/work"))
        .and(header("host", authority(&live).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .expect(10)
        .mount(&live)
        .await;

    let client = Client::builder()
        .base_urls([dead_url(), live.uri(), dead_url()])
        .unwrap()
        .http_balance(Duration::from_secs(30))
        .build()
        .unwrap();

    for _ in 0..10 {
        let response = client.get("/work").await.unwrap();
        assert_eq!(response.text(), "done");
        assert_eq!(response.url.port(), Some(live.address().port()));
    }
}

#[tokio::test]
async fn test_balancer_keeps_logical_host_header() {
    let server = MockServer::start().await;
    let port = server.address().port();
    let logical = format!("orders.svc.test:{}", port);

    Mock::given(method("GET"))
        .and(path("/orders"))
        .and(header("host", logical.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(format!("http://{}", logical))
        .unwrap()
        .lookup(Arc::new(LoopbackLookup))
        .http_balance(Duration::from_secs(30))
        .build()
        .unwrap();

    let response = client.get("/orders").await.unwrap();
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.url.host_str(), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_balancer_exhaustion_returns_connect_error() {
    let client = Client::builder()
        .base_urls([dead_url(), dead_url()])
        .unwrap()
        .http_balance(Duration::ZERO)
        .build()
        .unwrap();

    let err = client.get("/anything").await.unwrap_err();
    assert!(err.is_dial_phase(), "expected dial-phase error, got {:?}", err);
}

#[tokio::test]
async fn test_balancer_does_not_retry_after_connect() {
    let slow = MockServer::start().await;
    let fast = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&slow)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fast)
        .await;

    let client = Client::builder()
        .base_urls([slow.uri(), fast.uri()])
        .unwrap()
        .http_balance(Duration::from_secs(30))
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let mut timeouts = 0;
    for _ in 0..10 {
        match client.get("/job").await {
            Ok(response) => assert_eq!(response.url.port(), Some(fast.address().port())),
            Err(Error::Timeout) => timeouts += 1,
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }

    // Each call reached exactly one upstream: a timeout is never masked.
    let slow_hits = slow.received_requests().await.unwrap().len();
    let fast_hits = fast.received_requests().await.unwrap().len();
    assert_eq!(slow_hits, timeouts);
    assert_eq!(slow_hits + fast_hits, 10);
}

#[tokio::test]
async fn test_custom_failover_policy() {
    let live = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&live)
        .await;

    let client = Client::builder()
        .base_urls([dead_url(), live.uri()])
        .unwrap()
        .http_balance(Duration::from_secs(30))
        .failover_policy(Arc::new(|_: &Error| false))
        .build()
        .unwrap();

    let mut failures = 0;
    for _ in 0..20 {
        if let Err(e) = client.get("/").await {
            assert!(e.is_dial_phase());
            failures += 1;
        }
    }
    let hits = live.received_requests().await.unwrap().len();
    assert_eq!(hits + failures, 20);
}

#[tokio::test]
async fn test_balancing_without_base_urls_fails_at_build() {
    let result = Client::builder().http_balance(Duration::from_secs(5)).build();
    assert!(matches!(result, Err(Error::ConfigurationError(_))));
}

#[tokio::test]
async fn test_response_to_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8, 1, 2, 3]))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let path = std::env::temp_dir().join(format!("upstream-download-{}", std::process::id()));
    client.get("/download").await.unwrap().to_file(&path).await.unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![0u8, 1, 2, 3]);
    tokio::fs::remove_file(&path).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_balanced_requests() {
    let live = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(50)
        .mount(&live)
        .await;

    let client = Client::builder()
        .base_urls([live.uri(), dead_url()])
        .unwrap()
        .http_balance(Duration::from_secs(30))
        .build()
        .unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.get(format!("/item/{}", i)).await })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_success());
    }
}

#[tokio::test]
async fn test_cookies_persist_across_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "session=abc123; Path=/"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("cookie", "session=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome back"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .build()
        .unwrap();

    let login = client
        .post("/login", &serde_json::json!({"user": "alice"}))
        .await
        .unwrap();
    assert!(login.is_success());

    let profile = client.get("/profile").await.unwrap();
    assert_eq!(profile.status.as_u16(), 200);
    assert_eq!(profile.text(), "welcome back");
}

#[tokio::test]
async fn test_cookie_store_can_be_disabled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("set-cookie", "session=abc123; Path=/"),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = Client::builder()
        .base_url(mock_server.uri())
        .unwrap()
        .cookie_store(false)
        .build()
        .unwrap();

    client.get("/login").await.unwrap();
    client.get("/profile").await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].headers.get("cookie").is_none());
}

#[tokio::test]
async fn test_package_level_helpers_use_default_client() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/items/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = upstream::get(format!("{}/ping", mock_server.uri())).await.unwrap();
    assert_eq!(response.text(), "pong");

    let response = upstream::delete(format!("{}/items/7", mock_server.uri())).await.unwrap();
    assert_eq!(response.status.as_u16(), 204);
}
