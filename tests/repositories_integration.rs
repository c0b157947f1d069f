//! Integration tests using WireMock
//!
//! These run the full stack over the reqwest transport against a mock HTTP
//! server: headers, query building, classification, caching and retries.

use chrono::Utc;
use integrations_github_repos::{
    ControllerOptions, ErrorKind, FetchClient, ListOptions, RepositoriesController, RetryPolicy,
    SessionStatus, SortKey,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50))
        .with_jitter(Duration::ZERO)
}

fn client(server: &MockServer) -> Arc<FetchClient> {
    Arc::new(
        FetchClient::builder()
            .base_url(server.uri())
            .pat("test-token")
            .retry(fast_policy())
            .build()
            .expect("Failed to build client"),
    )
}

fn repo(id: u64, name: &str, stars: u32, fork: bool) -> Value {
    json!({
        "id": id,
        "name": name,
        "full_name": format!("octocat/{}", name),
        "description": format!("{} description", name),
        "fork": fork,
        "private": false,
        "topics": [],
        "html_url": format!("https://github.com/octocat/{}", name),
        "homepage": null,
        "updated_at": "2024-05-01T12:00:00Z",
        "created_at": "2021-05-01T12:00:00Z",
        "language": "Rust",
        "stargazers_count": stars,
        "forks_count": 0,
        "size": 10
    })
}

fn rate_limit_headers(template: ResponseTemplate, remaining: u32, reset: i64) -> ResponseTemplate {
    template
        .insert_header("x-ratelimit-limit", "60")
        .insert_header("x-ratelimit-remaining", remaining.to_string().as_str())
        .insert_header("x-ratelimit-reset", reset.to_string().as_str())
}

#[tokio::test]
async fn test_list_repositories_sends_expected_request() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 3600;

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .and(query_param("sort", "updated"))
        .and(query_param("per_page", "8"))
        .and(query_param("page", "1"))
        .and(query_param("type", "owner"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("accept", "application/vnd.github+json"))
        .and(header("x-github-api-version", "2022-11-28"))
        .respond_with(rate_limit_headers(
            ResponseTemplate::new(200).set_body_json(json!([
                repo(1, "small", 3, false),
                repo(2, "big", 10, false),
                repo(3, "forked", 50, true),
                repo(4, "tiny", 1, false),
            ])),
            59,
            reset,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let service = client(&server).repositories();
    let repos = service
        .list_repositories("octocat", &ListOptions::default().sort(SortKey::Stars))
        .await
        .expect("listing should succeed");

    let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["big", "small", "tiny"]);
    assert_eq!(service.rate_limit_snapshot().remaining, 59);
}

#[tokio::test]
async fn test_rate_limited_response_is_classified() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 120;

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .respond_with(rate_limit_headers(
            ResponseTemplate::new(403).set_body_json(json!({
                "message": "API rate limit exceeded for 127.0.0.1."
            })),
            0,
            reset,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let service = client(&server).repositories();
    let error = service
        .list_repositories("octocat", &ListOptions::default())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::RateLimit);
    assert_eq!(error.http_status(), Some(403));
    let wait = error.retry_after_seconds().unwrap() as i64;
    let expected = reset - Utc::now().timestamp();
    assert!((wait - expected).abs() <= 1, "wait {} expected {}", wait, expected);
    assert!(service.rate_limit_snapshot().limited);

    let blocked = service
        .list_repositories("octocat", &ListOptions::default().page(2))
        .await
        .unwrap_err();
    assert_eq!(blocked.kind(), ErrorKind::RateLimit);
}

#[tokio::test]
async fn test_forbidden_with_quota_left() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 3600;

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .respond_with(rate_limit_headers(
            ResponseTemplate::new(403).set_body_json(json!({ "message": "Resource not accessible" })),
            12,
            reset,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let error = client(&server)
        .repositories()
        .list_repositories("octocat", &ListOptions::default())
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Forbidden);
    assert!(!error.is_retryable());
    assert_eq!(error.to_string(), ErrorKind::Forbidden.user_message());
}

#[tokio::test]
async fn test_second_listing_served_from_cache() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([repo(1, "only", 1, false)])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let service = client.repositories();
    let first = service
        .list_repositories("octocat", &ListOptions::default())
        .await
        .unwrap();
    let second = service
        .list_repositories("octocat", &ListOptions::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(client.context().metrics().snapshot().cache_hits, 1);
}

#[tokio::test]
async fn test_server_errors_retried_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "message": "Server Error" })))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([repo(1, "ok", 1, false)])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let repos = client
        .repositories()
        .list_repositories("octocat", &ListOptions::default())
        .await
        .expect("retries should recover");

    assert_eq!(repos.len(), 1);
    assert_eq!(client.context().metrics().snapshot().requests_retried, 3);
}

#[tokio::test]
async fn test_not_found_makes_single_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/ghost"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "Not Found" })))
        .expect(1)
        .mount(&server)
        .await;

    let error = client(&server)
        .repositories()
        .get_user_info("ghost")
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::NotFound);
    assert!(error.details().contains("HTTP 404"));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "login": "octocat" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let client = FetchClient::builder()
        .base_url(server.uri())
        .timeout(Duration::from_millis(50))
        .no_retry()
        .build()
        .unwrap();

    let error = Arc::new(client)
        .repositories()
        .get_user_info("octocat")
        .await
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Timeout);
    assert!(error.is_recoverable());
}

#[tokio::test]
async fn test_controller_end_to_end() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            repo(1, "a", 1, false),
            repo(2, "b", 2, false),
        ])))
        .mount(&server)
        .await;

    let controller = RepositoriesController::new(
        client(&server).repositories(),
        "octocat",
        ControllerOptions::default().sort(SortKey::Stars),
    );
    controller.fetch();

    let mut views = controller.subscribe();
    let view = views
        .wait_for(|v| v.status == SessionStatus::Success)
        .await
        .unwrap()
        .clone();

    assert!(view.has_data);
    assert_eq!(view.repositories[0].name, "b");
    assert_eq!(view.retry_count, 0);
}
