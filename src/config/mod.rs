//! Configuration types for the repository client.

use crate::auth::AuthMethod;
use crate::errors::ClassifiedError;
use crate::resilience::RetryPolicy;
use std::time::Duration;
use url::Url;

/// Default GitHub API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// Default GitHub API version (date-based).
pub const DEFAULT_API_VERSION: &str = "2022-11-28";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default User-Agent header.
pub const DEFAULT_USER_AGENT: &str = "integrations-github-repos/0.1.0";

/// Response cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of cached responses.
    pub capacity: usize,
    /// Freshness window for repository listings.
    pub repositories_ttl: Duration,
    /// Freshness window for user profiles.
    pub user_ttl: Duration,
    /// Freshness window for every other endpoint.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            repositories_ttl: Duration::from_secs(5 * 60),
            user_ttl: Duration::from_secs(10 * 60),
            default_ttl: Duration::from_secs(2 * 60),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL.
    pub base_url: String,
    /// API version header.
    pub api_version: String,
    /// Optional static credential.
    pub auth: Option<AuthMethod>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Retry policy of the fetch layer.
    pub retry: RetryPolicy,
    /// Response cache configuration.
    pub cache: CacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            auth: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry: RetryPolicy::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Builds a configuration from `GITHUB_TOKEN` and `GITHUB_API_URL`.
    ///
    /// Both variables are optional; without a token requests are anonymous.
    pub fn from_env() -> Result<Self, ClassifiedError> {
        let mut builder = Self::builder();
        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            builder = builder.auth(AuthMethod::pat(token));
        }
        if let Ok(url) = std::env::var("GITHUB_API_URL") {
            builder = builder.base_url(url);
        }
        builder.build()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ClassifiedError> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            ClassifiedError::validation(format!("Invalid base URL {}: {}", self.base_url, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClassifiedError::validation(
                "Base URL must start with http:// or https://",
            ));
        }

        if self.user_agent.is_empty() {
            return Err(ClassifiedError::validation(
                "User-Agent is required by GitHub API",
            ));
        }

        if self.timeout.is_zero() {
            return Err(ClassifiedError::validation("Timeout must be non-zero"));
        }

        if self.cache.capacity == 0 {
            return Err(ClassifiedError::validation(
                "Cache capacity must be at least 1",
            ));
        }

        Ok(())
    }
}

/// Builder for ClientConfig.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    api_version: Option<String>,
    auth: Option<AuthMethod>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    retry: Option<RetryPolicy>,
    cache: Option<CacheConfig>,
}

impl ClientConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the API version.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Sets the credential.
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth.non_blank();
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the User-Agent header.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Disables retries.
    pub fn no_retry(mut self) -> Self {
        self.retry = Some(RetryPolicy::no_retry());
        self
    }

    /// Sets the cache configuration.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Result<ClientConfig, ClassifiedError> {
        let config = ClientConfig {
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            auth: self.auth,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            retry: self.retry.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.cache.capacity, 100);
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::builder()
            .base_url("https://github.example.com/api/v3")
            .user_agent("portfolio/1.0")
            .timeout(Duration::from_secs(5))
            .auth(AuthMethod::pat("ghp_token"))
            .build()
            .unwrap();

        assert_eq!(config.base_url, "https://github.example.com/api/v3");
        assert_eq!(config.user_agent, "portfolio/1.0");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.auth.is_some());
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ClientConfig::builder().base_url("invalid-url").build();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);

        let result = ClientConfig::builder().base_url("ftp://example.com").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = ClientConfig::builder()
            .cache(CacheConfig {
                capacity: 0,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }
}
