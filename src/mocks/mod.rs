//! Mock implementations for testing consumers of the repository client.

use crate::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};
use crate::types::ApiRepository;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use url::Url;

/// Scripted transport for testing.
///
/// Responses are queued per `METHOD:path` (query ignored) and consumed in
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    /// Response store.
    responses: Arc<RwLock<HashMap<String, VecDeque<MockResponse>>>>,
    /// Request history.
    requests: Arc<RwLock<Vec<MockRequest>>>,
    /// Default behavior.
    default_behavior: DefaultBehavior,
}

/// A mock response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: String,
    /// Headers.
    pub headers: HashMap<String, String>,
    /// Delay before responding.
    pub delay: Option<std::time::Duration>,
    /// Fail at the transport level instead of responding.
    pub failure: Option<TransportError>,
}

impl MockResponse {
    /// Creates a response with the given status and raw body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: HashMap::new(),
            delay: None,
            failure: None,
        }
    }

    fn json(status: u16, body: serde_json::Value) -> Self {
        Self::new(status, body.to_string()).with_header("content-type", "application/json")
    }

    /// Creates a successful response with the given body.
    pub fn ok<T: Serialize>(body: &T) -> Self {
        Self::new(200, serde_json::to_string(body).unwrap_or_default())
            .with_header("content-type", "application/json; charset=utf-8")
    }

    /// Creates a 404 Not Found response.
    pub fn not_found(message: &str) -> Self {
        Self::json(
            404,
            serde_json::json!({
                "message": message,
                "documentation_url": "https://docs.github.com/rest"
            }),
        )
    }

    /// Creates a 401 Unauthorized response.
    pub fn unauthorized(message: &str) -> Self {
        Self::json(
            401,
            serde_json::json!({
                "message": message,
                "documentation_url": "https://docs.github.com/rest"
            }),
        )
    }

    /// Creates a 403 Forbidden response with quota left.
    pub fn forbidden(message: &str) -> Self {
        let reset_at = Utc::now() + Duration::hours(1);
        Self::json(
            403,
            serde_json::json!({
                "message": message,
                "documentation_url": "https://docs.github.com/rest"
            }),
        )
        .with_rate_limit(60, 42, reset_at.timestamp())
    }

    /// Creates a 422 Validation Failed response.
    pub fn validation_failed(message: &str) -> Self {
        Self::json(
            422,
            serde_json::json!({
                "message": message,
                "documentation_url": "https://docs.github.com/rest"
            }),
        )
    }

    /// Creates a rate limit exceeded response resetting at `reset_at`.
    pub fn rate_limited(reset_at: DateTime<Utc>) -> Self {
        Self::json(
            403,
            serde_json::json!({
                "message": "API rate limit exceeded",
                "documentation_url": "https://docs.github.com/rest/overview/resources-in-the-rest-api#rate-limiting"
            }),
        )
        .with_rate_limit(60, 0, reset_at.timestamp())
    }

    /// Creates a 500 Internal Server Error response.
    pub fn server_error(message: &str) -> Self {
        Self::json(500, serde_json::json!({ "message": message }))
    }

    /// Creates a transport-level failure.
    pub fn failure(error: TransportError) -> Self {
        let mut response = Self::new(0, "");
        response.failure = Some(error);
        response
    }

    /// Adds a delay to the response.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Adds a header to the response.
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds rate limit headers.
    pub fn with_rate_limit(mut self, limit: u32, remaining: u32, reset_timestamp: i64) -> Self {
        self.headers
            .insert("x-ratelimit-limit".to_string(), limit.to_string());
        self.headers
            .insert("x-ratelimit-remaining".to_string(), remaining.to_string());
        self.headers
            .insert("x-ratelimit-reset".to_string(), reset_timestamp.to_string());
        self
    }

    fn header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

/// A recorded mock request.
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Query string.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
}

impl MockRequest {
    /// Gets a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Gets a decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Default behavior for unmatched requests.
#[derive(Debug, Clone, Copy, Default)]
pub enum DefaultBehavior {
    /// Return 404 for unmatched requests.
    #[default]
    NotFound,
    /// Fail at the transport level for unmatched requests.
    Error,
    /// Panic on unmatched requests.
    Panic,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default behavior for unmatched requests.
    pub fn with_default_behavior(mut self, behavior: DefaultBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Queues a response for a given method and path.
    pub fn register(&self, method: &str, path: &str, response: MockResponse) {
        let key = format!("{}:{}", method.to_uppercase(), path);
        self.responses
            .write()
            .entry(key)
            .or_default()
            .push_back(response);
    }

    /// Queues a GET response.
    pub fn on_get(&self, path: &str, response: MockResponse) {
        self.register("GET", path, response);
    }

    /// Gets all recorded requests.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests.read().clone()
    }

    /// Gets the count of requests made.
    pub fn request_count(&self) -> usize {
        self.requests.read().len()
    }

    /// Verifies that a specific request was made.
    pub fn verify_request(&self, method: &str, path: &str) -> bool {
        self.requests
            .read()
            .iter()
            .any(|r| r.method.eq_ignore_ascii_case(method) && r.path == path)
    }

    /// Clears recorded requests.
    pub fn clear_requests(&self) {
        self.requests.write().clear();
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let (path, query) = match Url::parse(&request.url) {
            Ok(url) => (url.path().to_string(), url.query().map(String::from)),
            Err(_) => (request.url.clone(), None),
        };
        let method = request.method.as_str().to_uppercase();

        self.requests.write().push(MockRequest {
            method: method.clone(),
            path: path.clone(),
            query,
            headers: request.headers.clone(),
            timestamp: Utc::now(),
        });

        let key = format!("{}:{}", method, path);
        let response = self
            .responses
            .write()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());

        let Some(response) = response else {
            return match self.default_behavior {
                DefaultBehavior::NotFound => Ok(TransportResponse {
                    status: 404,
                    headers: HeaderMap::new(),
                    body: Bytes::from(format!(
                        r#"{{"message":"No mock response for {} {}"}}"#,
                        method, path
                    )),
                }),
                DefaultBehavior::Error => Err(TransportError::Other(format!(
                    "No mock response for {} {}",
                    method, path
                ))),
                DefaultBehavior::Panic => panic!("No mock response for {} {}", method, path),
            };
        };

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(failure) = response.failure.clone() {
            return Err(failure);
        }

        Ok(TransportResponse {
            status: response.status,
            headers: response.header_map(),
            body: Bytes::from(response.body.clone()),
        })
    }
}

/// Test fixtures for wire records.
pub mod fixtures {
    use super::*;
    use serde_json::json;

    /// Creates a repository record with neutral defaults.
    pub fn repository(id: u64, name: &str) -> ApiRepository {
        ApiRepository {
            id,
            name: name.to_string(),
            description: Some(format!("The {} project", name)),
            fork: false,
            private: false,
            topics: vec!["rust".to_string()],
            html_url: format!("https://github.com/octocat/{}", name),
            homepage: None,
            updated_at: "2024-01-01T00:00:00Z".parse().unwrap_or_else(|_| Utc::now()),
            created_at: "2020-01-01T00:00:00Z".parse().unwrap_or_else(|_| Utc::now()),
            language: Some("Rust".to_string()),
            stargazers_count: 0,
            forks_count: 0,
            size: 100,
        }
    }

    /// Creates a forked repository record.
    pub fn fork(id: u64, name: &str) -> ApiRepository {
        ApiRepository {
            fork: true,
            ..repository(id, name)
        }
    }

    /// Creates a user profile payload.
    pub fn user(login: &str) -> serde_json::Value {
        json!({
            "login": login,
            "id": 1,
            "name": "The Octocat",
            "avatar_url": "https://avatars.githubusercontent.com/u/1?v=4",
            "html_url": format!("https://github.com/{}", login),
            "bio": null,
            "public_repos": 8,
            "followers": 10,
            "following": 0,
            "created_at": "2011-01-25T18:44:36Z"
        })
    }

    /// Creates a `/rate_limit` payload.
    pub fn rate_limit(limit: u32, remaining: u32) -> serde_json::Value {
        let reset = (Utc::now() + Duration::hours(1)).timestamp();
        json!({
            "resources": {
                "core": { "limit": limit, "remaining": remaining, "reset": reset, "used": (limit - remaining) }
            },
            "rate": { "limit": limit, "remaining": remaining, "reset": reset, "used": (limit - remaining) }
        })
    }
}
