//! Repository operations.

use crate::client::{FetchClient, RequestOptions};
use crate::errors::{ClassifiedError, GitHubResult};
use crate::observability::HealthReport;
use crate::resilience::{RateLimitSnapshot, RetryPolicy};
use crate::types::{ApiRepository, RepositorySummary, SortKey, UserProfile};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default number of repositories per page.
pub const DEFAULT_PAGE_SIZE: u32 = 8;

/// Service for repository operations.
#[derive(Clone)]
pub struct RepositoriesService {
    client: Arc<FetchClient>,
}

impl RepositoriesService {
    /// Creates a new repositories service.
    pub fn new(client: Arc<FetchClient>) -> Self {
        Self { client }
    }

    /// Gets the underlying fetch client.
    pub fn client(&self) -> &FetchClient {
        &self.client
    }

    /// Lists a user's repositories using the client's retry policy.
    pub async fn list_repositories(
        &self,
        username: &str,
        options: &ListOptions,
    ) -> GitHubResult<Vec<RepositorySummary>> {
        let policy = self.client.config().retry.clone();
        self.list_repositories_with(username, options, &policy, CancellationToken::new())
            .await
    }

    /// Lists a user's repositories under `policy`, aborting when `cancel` fires.
    pub async fn list_repositories_with(
        &self,
        username: &str,
        options: &ListOptions,
        policy: &RetryPolicy,
        cancel: CancellationToken,
    ) -> GitHubResult<Vec<RepositorySummary>> {
        let username = require_username(username)?;
        let endpoint = format!(
            "/users/{}/repos?{}",
            encode_segment(username),
            options.query_string()?
        );

        let request = RequestOptions::get().with_cancel(cancel);
        let raw: Vec<ApiRepository> = self.client.get_json(&endpoint, &request, policy).await?;
        let fetched = raw.len();

        let mut repositories: Vec<RepositorySummary> = raw
            .into_iter()
            .map(RepositorySummary::from)
            .filter(|r| options.include_forks || !r.is_fork)
            .filter(|r| options.include_private || !r.is_private)
            .collect();
        sort_repositories(&mut repositories, options.sort);

        debug!(
            username = %username,
            fetched = fetched,
            returned = repositories.len(),
            sort = %options.sort,
            "Listed repositories"
        );
        Ok(repositories)
    }

    /// Gets a user's public profile.
    pub async fn get_user_info(&self, username: &str) -> GitHubResult<UserProfile> {
        let username = require_username(username)?;
        self.client
            .get_json(
                &format!("/users/{}", encode_segment(username)),
                &RequestOptions::get(),
                &self.client.config().retry,
            )
            .await
    }

    /// Probes the API with a single uncached request.
    ///
    /// Never fails; a failed probe is reported as unhealthy.
    pub async fn check_health(&self) -> HealthReport {
        let started = std::time::Instant::now();
        let result = self
            .client
            .request(
                "/rate_limit",
                &RequestOptions::get().no_cache(),
                &RetryPolicy::no_retry(),
            )
            .await;
        let latency = started.elapsed();

        match result {
            Ok(payload) => {
                self.record_quota_body(&payload);
                let rate_limit = self.rate_limit_snapshot();
                HealthReport {
                    healthy: !rate_limit.limited,
                    latency,
                    error: rate_limit
                        .limited
                        .then(|| ClassifiedError::rate_limited(rate_limit.retry_after_seconds()))
                        .map(|e| e.user_message().to_string()),
                    rate_limit,
                }
            }
            Err(error) => HealthReport {
                healthy: false,
                latency,
                rate_limit: self.rate_limit_snapshot(),
                error: Some(error.user_message().to_string()),
            },
        }
    }

    /// Drops every cached response.
    pub fn clear_cache(&self) {
        self.client.context().cache().clear();
    }

    /// Gets the current quota.
    pub fn rate_limit_snapshot(&self) -> RateLimitSnapshot {
        self.client.context().rate_limit().snapshot()
    }

    fn record_quota_body(&self, payload: &Value) {
        let Some(core) = payload
            .pointer("/resources/core")
            .or_else(|| payload.get("rate"))
        else {
            return;
        };

        let field = |name: &str| core.get(name).and_then(Value::as_u64);
        let count = |name: &str| field(name).and_then(|v| u32::try_from(v).ok());
        let reset_at = field("reset")
            .and_then(|v| i64::try_from(v).ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        if let (Some(limit), Some(remaining), Some(reset_at)) =
            (count("limit"), count("remaining"), reset_at)
        {
            self.client
                .context()
                .rate_limit()
                .record(limit, remaining, reset_at);
        }
    }
}

/// Options for listing repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    /// Client-side sort order.
    pub sort: SortKey,
    /// Items per page.
    pub page_size: u32,
    /// Page number, starting at 1.
    pub page: u32,
    /// Keep forked repositories.
    pub include_forks: bool,
    /// Keep private repositories.
    pub include_private: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            sort: SortKey::default(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
            include_forks: false,
            include_private: false,
        }
    }
}

impl ListOptions {
    /// Sets the sort order.
    pub fn sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    /// Sets the page size.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the page.
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Keeps forks in the result.
    pub fn include_forks(mut self, include: bool) -> Self {
        self.include_forks = include;
        self
    }

    /// Keeps private repositories in the result.
    pub fn include_private(mut self, include: bool) -> Self {
        self.include_private = include;
        self
    }

    fn query_string(&self) -> GitHubResult<String> {
        let query = ListReposQuery {
            sort: self.sort.api_param(),
            per_page: self.page_size.max(1),
            page: self.page.max(1),
            repo_type: "owner",
        };
        serde_urlencoded::to_string(&query)
            .map_err(|e| ClassifiedError::validation(format!("Invalid query parameters: {}", e)))
    }
}

#[derive(Serialize)]
struct ListReposQuery {
    sort: &'static str,
    per_page: u32,
    page: u32,
    #[serde(rename = "type")]
    repo_type: &'static str,
}

/// Sorts in place, descending by `sort`. Equal keys keep their order.
pub fn sort_repositories(repositories: &mut [RepositorySummary], sort: SortKey) {
    match sort {
        SortKey::Updated => repositories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        SortKey::Stars => repositories.sort_by(|a, b| b.star_count.cmp(&a.star_count)),
        SortKey::Forks => repositories.sort_by(|a, b| b.fork_count.cmp(&a.fork_count)),
        SortKey::Created => repositories.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Size => repositories.sort_by(|a, b| b.size.cmp(&a.size)),
    }
}

fn require_username(username: &str) -> GitHubResult<&str> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(ClassifiedError::validation("Username is required"));
    }
    Ok(trimmed)
}

fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::mocks::{fixtures, MockResponse, MockTransport};
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use test_case::test_case;

    fn service(mock: &MockTransport) -> RepositoriesService {
        let client = FetchClient::builder()
            .transport(Arc::new(mock.clone()))
            .retry(RetryPolicy::new(0, Duration::from_millis(1), Duration::from_millis(1)))
            .build()
            .unwrap();
        Arc::new(client).repositories()
    }

    fn repos_named(names: &[&str]) -> Vec<ApiRepository> {
        names
            .iter()
            .enumerate()
            .map(|(id, name)| fixtures::repository(id as u64, name))
            .collect()
    }

    fn names(repositories: &[RepositorySummary]) -> Vec<&str> {
        repositories.iter().map(|r| r.name.as_str()).collect()
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    #[tokio::test]
    async fn test_blank_username_rejected_without_network(username: &str) {
        let mock = MockTransport::new();
        let service = service(&mock);

        let error = service
            .list_repositories(username, &ListOptions::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(!error.is_retryable());
        assert_eq!(mock.request_count(), 0);

        let error = service.get_user_info(username).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_query_parameters() {
        let mock = MockTransport::new();
        mock.on_get("/users/octocat/repos", MockResponse::ok(&Vec::<ApiRepository>::new()));
        let service = service(&mock);

        service
            .list_repositories("octocat", &ListOptions::default().page(2).sort(SortKey::Created))
            .await
            .unwrap();

        let request = &mock.requests()[0];
        assert_eq!(request.path, "/users/octocat/repos");
        assert_eq!(request.query_param("sort").as_deref(), Some("created"));
        assert_eq!(request.query_param("per_page").as_deref(), Some("8"));
        assert_eq!(request.query_param("page").as_deref(), Some("2"));
        assert_eq!(request.query_param("type").as_deref(), Some("owner"));
    }

    #[tokio::test]
    async fn test_sort_by_stars_descending() {
        let mut repos = Vec::new();
        for (id, (name, stars)) in [("low", 3), ("high", 10), ("lowest", 1)].into_iter().enumerate() {
            let mut repo = fixtures::repository(id as u64, name);
            repo.stargazers_count = stars;
            repos.push(repo);
        }
        let mock = MockTransport::new();
        mock.on_get("/users/octocat/repos", MockResponse::ok(&repos));
        let service = service(&mock);

        let result = service
            .list_repositories("octocat", &ListOptions::default().sort(SortKey::Stars))
            .await
            .unwrap();

        let stars: Vec<u32> = result.iter().map(|r| r.star_count).collect();
        assert_eq!(stars, vec![10, 3, 1]);
    }

    #[tokio::test]
    async fn test_default_sort_by_updated() {
        let base = Utc::now();
        let mut repos = Vec::new();
        for (id, (name, age_days)) in [("old", 30), ("new", 1), ("mid", 7)].into_iter().enumerate() {
            let mut repo = fixtures::repository(id as u64, name);
            repo.updated_at = base - ChronoDuration::days(age_days);
            repos.push(repo);
        }
        let mock = MockTransport::new();
        mock.on_get("/users/octocat/repos", MockResponse::ok(&repos));
        let service = service(&mock);

        let result = service
            .list_repositories("octocat", &ListOptions::default())
            .await
            .unwrap();

        assert_eq!(names(&result), vec!["new", "mid", "old"]);
    }

    #[tokio::test]
    async fn test_sort_by_created_descending() {
        let base = Utc::now();
        let mut repos = Vec::new();
        for (id, age_days) in [400, 10, 90].into_iter().enumerate() {
            let mut repo = fixtures::repository(id as u64, &format!("r{}", id));
            repo.created_at = base - ChronoDuration::days(age_days);
            repos.push(repo);
        }
        let mock = MockTransport::new();
        mock.on_get("/users/octocat/repos", MockResponse::ok(&repos));
        let service = service(&mock);

        let result = service
            .list_repositories("octocat", &ListOptions::default().sort(SortKey::Created))
            .await
            .unwrap();

        assert_eq!(names(&result), vec!["r1", "r2", "r0"]);
    }

    #[tokio::test]
    async fn test_sort_by_size_descending() {
        let mut repos = Vec::new();
        for (id, size) in [5, 500, 50].into_iter().enumerate() {
            let mut repo = fixtures::repository(id as u64, &format!("r{}", id));
            repo.size = size;
            repos.push(repo);
        }
        let mock = MockTransport::new();
        mock.on_get("/users/octocat/repos", MockResponse::ok(&repos));
        let service = service(&mock);

        let result = service
            .list_repositories("octocat", &ListOptions::default().sort(SortKey::Size))
            .await
            .unwrap();

        let sizes: Vec<u64> = result.iter().map(|r| r.size).collect();
        assert_eq!(sizes, vec![500, 50, 5]);
    }

    #[tokio::test]
    async fn test_malformed_listing_is_refetched() {
        let mock = MockTransport::new();
        mock.on_get("/users/octocat/repos", MockResponse::ok(&json!({"unexpected": true})));
        mock.on_get("/users/octocat/repos", MockResponse::ok(&repos_named(&["a"])));
        let service = service(&mock);

        let error = service
            .list_repositories("octocat", &ListOptions::default())
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unknown);

        let listed = service
            .list_repositories("octocat", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(names(&listed), vec!["a"]);
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_check_health_ignores_out_of_range_quota() {
        let mock = MockTransport::new();
        mock.on_get(
            "/rate_limit",
            MockResponse::ok(&json!({
                "rate": { "limit": 5_000_000_000u64, "remaining": 10, "reset": 1_900_000_000 }
            })),
        );
        let service = service(&mock);
        let before = service.rate_limit_snapshot();

        let report = service.check_health().await;

        assert!(report.healthy);
        assert_eq!(report.rate_limit.limit, before.limit);
        assert_eq!(report.rate_limit.remaining, before.remaining);
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let mut repositories: Vec<RepositorySummary> = ["a", "b", "c"]
            .into_iter()
            .enumerate()
            .map(|(id, name)| fixtures::repository(id as u64, name).into())
            .collect();
        repositories[2].fork_count = 5;

        sort_repositories(&mut repositories, SortKey::Forks);

        assert_eq!(names(&repositories), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_forks_and_private_filtered() {
        let mut private = fixtures::repository(6, "secret");
        private.private = true;
        let repos = vec![
            fixtures::repository(1, "one"),
            fixtures::fork(2, "fork-a"),
            fixtures::repository(3, "three"),
            fixtures::fork(4, "fork-b"),
            fixtures::repository(5, "five"),
            private,
        ];
        let mock = MockTransport::new();
        mock.on_get("/users/octocat/repos", MockResponse::ok(&repos));
        mock.on_get("/users/octocat/repos", MockResponse::ok(&repos));
        let service = service(&mock);

        let filtered = service
            .list_repositories("octocat", &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|r| !r.is_fork && !r.is_private));

        service.clear_cache();
        let everything = service
            .list_repositories(
                "octocat",
                &ListOptions::default().include_forks(true).include_private(true),
            )
            .await
            .unwrap();
        assert_eq!(everything.len(), 6);
    }

    #[tokio::test]
    async fn test_get_user_info() {
        let mock = MockTransport::new();
        mock.on_get("/users/octocat", MockResponse::ok(&fixtures::user("octocat")));
        let service = service(&mock);

        let profile = service.get_user_info("octocat").await.unwrap();

        assert_eq!(profile.login, "octocat");
        assert_eq!(profile.public_repos, 8);
        assert_eq!(profile.name.as_deref(), Some("The Octocat"));
    }

    #[tokio::test]
    async fn test_check_health_reports_quota() {
        let mock = MockTransport::new();
        mock.on_get("/rate_limit", MockResponse::ok(&fixtures::rate_limit(5000, 4990)));
        mock.on_get("/rate_limit", MockResponse::ok(&fixtures::rate_limit(5000, 4989)));
        let service = service(&mock);

        let report = service.check_health().await;
        assert!(report.healthy);
        assert!(report.error.is_none());
        assert_eq!(report.rate_limit.limit, 5000);
        assert_eq!(report.rate_limit.remaining, 4990);

        let report = service.check_health().await;
        assert_eq!(report.rate_limit.remaining, 4989);
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_check_health_captures_failure() {
        let mock = MockTransport::new();
        mock.on_get("/rate_limit", MockResponse::server_error("unavailable"));
        let service = service(&mock);

        let report = service.check_health().await;

        assert!(!report.healthy);
        assert_eq!(
            report.error.as_deref(),
            Some(ErrorKind::ServerError.user_message())
        );
        assert_eq!(mock.request_count(), 1);
    }
}
