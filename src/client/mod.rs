//! Retrying fetch client.
//!
//! One logical request runs: cache lookup, rate-limit gate, network call with
//! timeout, classification, cache write, and a retry loop with exponential
//! backoff. Cache hits never touch the rate-limit tracker.

use crate::auth::AuthMethod;
use crate::cache::ResponseCache;
use crate::config::{CacheConfig, ClientConfig, ClientConfigBuilder};
use crate::errors::{
    classify, is_rate_limit_error, ClassifiedError, ErrorKind, GitHubResult, RawFailure,
};
use crate::observability::{Metrics, RequestTimer, TracingHooks};
use crate::resilience::{RateLimitTracker, RetryPolicy};
use crate::services::RepositoriesService;
use crate::transport::{
    HttpTransport, ReqwestTransport, TransportError, TransportRequest, TransportResponse,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// GitHub error response format.
#[derive(Debug, serde::Deserialize)]
struct GitHubErrorResponse {
    message: String,
}

/// State shared by every client and consumer built from it.
#[derive(Debug, Clone)]
pub struct ApiContext {
    rate_limit: Arc<RateLimitTracker>,
    cache: Arc<ResponseCache>,
    metrics: Arc<Metrics>,
}

impl Default for ApiContext {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ApiContext {
    /// Creates a fresh context with an empty cache and default quota.
    pub fn new(cache: CacheConfig) -> Self {
        Self {
            rate_limit: Arc::new(RateLimitTracker::new()),
            cache: Arc::new(ResponseCache::new(cache)),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Gets the rate limit tracker.
    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    /// Gets the response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Gets the metrics collector.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// HTTP method.
    pub method: Method,
    /// Overrides the configured timeout.
    pub timeout: Option<Duration>,
    /// Read and write the response cache (GET only).
    pub use_cache: bool,
    /// Abort signal checked at every suspension point.
    pub cancel: CancellationToken,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    /// Options for a cached GET.
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            timeout: None,
            use_cache: true,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches an abort signal.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Skips the response cache.
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    fn cacheable(&self) -> bool {
        self.use_cache && self.method == Method::GET
    }
}

/// Client that fetches, caches and retries GitHub API calls.
pub struct FetchClient {
    transport: Arc<dyn HttpTransport>,
    config: ClientConfig,
    context: ApiContext,
}

impl FetchClient {
    /// Creates a client over `reqwest` with its own context.
    pub fn new(config: ClientConfig) -> GitHubResult<Self> {
        let transport = ReqwestTransport::new()
            .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, e.to_string()))?;
        let context = ApiContext::new(config.cache.clone());
        Self::with_transport(config, Arc::new(transport), context)
    }

    /// Creates a client over any transport sharing an existing context.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        context: ApiContext,
    ) -> GitHubResult<Self> {
        config.validate()?;
        debug!(
            base_url = %config.base_url,
            auth = config.auth.as_ref().map_or("anonymous", |a| a.token_prefix()),
            "GitHub client created"
        );
        Ok(Self {
            transport,
            config,
            context,
        })
    }

    /// Creates a new client builder.
    pub fn builder() -> FetchClientBuilder {
        FetchClientBuilder::new()
    }

    /// Gets the base URL.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Gets the shared context.
    pub fn context(&self) -> &ApiContext {
        &self.context
    }

    /// Gets the repositories service.
    pub fn repositories(self: &Arc<Self>) -> RepositoriesService {
        RepositoriesService::new(Arc::clone(self))
    }

    /// Fetches `endpoint` and decodes the payload into `T`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
    ) -> GitHubResult<T> {
        let payload = self.request(endpoint, options, policy).await?;
        serde_json::from_value(payload).map_err(|e| {
            // A payload that fails to decode must not be served again.
            if options.cacheable() {
                self.context
                    .cache
                    .remove(&ResponseCache::key(&options.method, endpoint));
            }
            classify(
                RawFailure::Decode(format!("Failed to deserialize response: {}", e)),
                &self.context.rate_limit.snapshot(),
            )
        })
    }

    /// Runs one logical request under `policy`.
    ///
    /// Rate-limit errors and cancelled requests are never retried here.
    pub async fn request(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        policy: &RetryPolicy,
    ) -> GitHubResult<Value> {
        let cache_key = ResponseCache::key(&options.method, endpoint);

        if options.cacheable() {
            if let Some(payload) = self.context.cache.get(&cache_key) {
                self.context.metrics.record_cache_hit();
                TracingHooks::on_cache_hit(&cache_key);
                return Ok(payload);
            }
        }

        let mut attempt = 0;
        loop {
            match self.attempt(endpoint, options).await {
                Ok(payload) => {
                    if options.cacheable() {
                        self.context.cache.set(cache_key, payload.clone());
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    let give_up = options.cancel.is_cancelled()
                        || attempt >= policy.max_retries
                        || !error.is_retryable()
                        || is_rate_limit_error(&error);
                    if give_up {
                        return Err(error);
                    }

                    let delay = policy.backoff_delay(attempt);
                    TracingHooks::on_retry(endpoint, attempt + 1, delay);
                    self.context.metrics.record_retry();

                    tokio::select! {
                        _ = options.cancel.cancelled() => return Err(ClassifiedError::aborted()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, endpoint: &str, options: &RequestOptions) -> GitHubResult<Value> {
        if self.context.rate_limit.is_limited() {
            let snapshot = self.context.rate_limit.snapshot();
            self.context.metrics.record_rate_limited();
            TracingHooks::on_rate_limit_blocked(&snapshot);
            return Err(ClassifiedError::rate_limited(snapshot.retry_after_seconds()));
        }

        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let request = self.build_request(options.method.clone(), endpoint, timeout)?;
        let method = request.method.to_string();
        let url = request.url.clone();
        TracingHooks::on_request_start(&method, &url, &request.headers);

        let timer = RequestTimer::new(self.context.metrics.clone());
        let outcome = tokio::select! {
            _ = options.cancel.cancelled() => Err(RawFailure::Aborted),
            result = tokio::time::timeout(timeout, self.transport.send(request)) => match result {
                Err(_) => Err(RawFailure::Timeout),
                Ok(Err(TransportError::Timeout(_))) => Err(RawFailure::Timeout),
                Ok(Err(e)) => Err(RawFailure::Transport(e.to_string())),
                Ok(Ok(response)) => Ok(response),
            },
        };

        let response = match outcome {
            Ok(response) => response,
            Err(failure) => {
                timer.failure();
                let error = classify(failure, &self.context.rate_limit.snapshot());
                TracingHooks::on_request_error(&method, &url, &error.details());
                return Err(error);
            }
        };

        self.context
            .rate_limit
            .record_response_headers(&response.headers);

        if !response.is_success() {
            timer.failure();
            let error = classify(
                RawFailure::Http {
                    status: response.status,
                    message: error_message(&response),
                },
                &self.context.rate_limit.snapshot(),
            );
            TracingHooks::on_request_error(&method, &url, &error.details());
            return Err(error);
        }

        let elapsed = timer.success();
        TracingHooks::on_request_complete(&method, &url, response.status, elapsed);

        parse_body(&response)
            .map_err(|failure| classify(failure, &self.context.rate_limit.snapshot()))
    }

    fn build_request(
        &self,
        method: Method,
        endpoint: &str,
        timeout: Duration,
    ) -> GitHubResult<TransportRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_str(&self.config.api_version)
                .map_err(|_| ClassifiedError::validation("Invalid API version header"))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.config.user_agent)
                .map_err(|_| ClassifiedError::validation("Invalid User-Agent header"))?,
        );
        if let Some(auth) = &self.config.auth {
            let mut value = HeaderValue::from_str(&auth.authorization_header())
                .map_err(|_| ClassifiedError::validation("Invalid credential"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(TransportRequest {
            method,
            url: self.build_url(endpoint),
            headers,
            timeout,
        })
    }

    fn build_url(&self, endpoint: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let endpoint = endpoint.trim_start_matches('/');
        format!("{}/{}", base, endpoint)
    }
}

fn error_message(response: &TransportResponse) -> String {
    serde_json::from_slice::<GitHubErrorResponse>(&response.body)
        .map(|e| e.message)
        .unwrap_or_else(|_| format!("HTTP {} error", response.status))
}

fn parse_body(response: &TransportResponse) -> Result<Value, RawFailure> {
    if response.body.is_empty() {
        return Ok(Value::Null);
    }

    let is_json = response
        .content_type()
        .map(|ct| ct.contains("json"))
        .unwrap_or(true);

    if is_json {
        serde_json::from_slice(&response.body)
            .map_err(|e| RawFailure::Decode(format!("Invalid JSON in response: {}", e)))
    } else {
        Ok(Value::String(
            String::from_utf8_lossy(&response.body).into_owned(),
        ))
    }
}

/// Builder for FetchClient.
pub struct FetchClientBuilder {
    config_builder: ClientConfigBuilder,
    transport: Option<Arc<dyn HttpTransport>>,
    context: Option<ApiContext>,
}

impl FetchClientBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_builder: ClientConfig::builder(),
            transport: None,
            context: None,
        }
    }

    /// Sets the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(url);
        self
    }

    /// Sets the credential.
    pub fn auth(mut self, auth: AuthMethod) -> Self {
        self.config_builder = self.config_builder.auth(auth);
        self
    }

    /// Sets a personal access token.
    pub fn pat(self, token: impl Into<String>) -> Self {
        self.auth(AuthMethod::pat(token))
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the User-Agent.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.user_agent(ua);
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config_builder = self.config_builder.retry(policy);
        self
    }

    /// Disables retries.
    pub fn no_retry(mut self) -> Self {
        self.config_builder = self.config_builder.no_retry();
        self
    }

    /// Sets the cache configuration. Ignored when a context is supplied.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.config_builder = self.config_builder.cache(config);
        self
    }

    /// Uses a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shares an existing context.
    pub fn context(mut self, context: ApiContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Builds the client.
    pub fn build(self) -> GitHubResult<FetchClient> {
        let config = self.config_builder.build()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new()
                    .map_err(|e| ClassifiedError::new(ErrorKind::Unknown, e.to_string()))?,
            ),
        };
        let context = self
            .context
            .unwrap_or_else(|| ApiContext::new(config.cache.clone()));
        FetchClient::with_transport(config, transport, context)
    }
}

impl Default for FetchClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
