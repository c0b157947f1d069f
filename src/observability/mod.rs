//! Observability: request metrics, tracing hooks and health reports.

use crate::resilience::RateLimitSnapshot;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Metrics collector for API operations.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Network requests issued.
    requests_total: AtomicU64,
    /// Successful requests.
    requests_success: AtomicU64,
    /// Failed requests.
    requests_failed: AtomicU64,
    /// Retries scheduled by the fetch layer.
    requests_retried: AtomicU64,
    /// Requests rejected locally by the rate-limit gate.
    requests_rate_limited: AtomicU64,
    /// Requests answered from the cache.
    cache_hits: AtomicU64,
    /// Total request latency in microseconds.
    latency_total_us: AtomicU64,
    /// Request count for latency calculation.
    latency_count: AtomicU64,
}

impl Metrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request.
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful request.
    pub fn record_success(&self) {
        self.requests_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed request.
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retry.
    pub fn record_retry(&self) {
        self.requests_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rate-limited rejection.
    pub fn record_rate_limited(&self) {
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records request latency.
    pub fn record_latency(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.latency_total_us.fetch_add(us, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the average latency in microseconds.
    pub fn average_latency_us(&self) -> u64 {
        let total = self.latency_total_us.load(Ordering::Relaxed);
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            total / count
        }
    }

    /// Gets a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_retried: self.requests_retried.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            average_latency_us: self.average_latency_us(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Network requests issued.
    pub requests_total: u64,
    /// Successful requests.
    pub requests_success: u64,
    /// Failed requests.
    pub requests_failed: u64,
    /// Retries scheduled.
    pub requests_retried: u64,
    /// Local rate-limit rejections.
    pub requests_rate_limited: u64,
    /// Cache hits.
    pub cache_hits: u64,
    /// Average latency in microseconds.
    pub average_latency_us: u64,
}

/// Request timer for measuring latency.
pub struct RequestTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RequestTimer {
    /// Starts timing a request and counts it.
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.record_request();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    /// Records success and latency.
    pub fn success(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.metrics.record_success();
        self.metrics.record_latency(elapsed);
        elapsed
    }

    /// Records failure and latency.
    pub fn failure(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.metrics.record_failure();
        self.metrics.record_latency(elapsed);
        elapsed
    }
}

/// Tracing hooks for API operations.
pub struct TracingHooks;

impl TracingHooks {
    /// Logs the start of an API request.
    pub fn on_request_start(method: &str, url: &str, headers: &HeaderMap) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let rendered: Vec<String> = headers
                .iter()
                .map(|(name, value)| {
                    format!(
                        "{}: {}",
                        name,
                        redact_header(name.as_str(), value.to_str().unwrap_or("<binary>"))
                    )
                })
                .collect();
            trace!(method = %method, url = %url, headers = ?rendered, "GitHub API request headers");
        }
        debug!(method = %method, url = %url, "GitHub API request started");
    }

    /// Logs the completion of an API request.
    pub fn on_request_complete(method: &str, url: &str, status: u16, duration: Duration) {
        info!(
            method = %method,
            url = %url,
            status = status,
            duration_ms = duration.as_millis() as u64,
            "GitHub API request completed"
        );
    }

    /// Logs a request error.
    pub fn on_request_error(method: &str, url: &str, error: &str) {
        warn!(method = %method, url = %url, error = %error, "GitHub API request failed");
    }

    /// Logs a retry attempt.
    pub fn on_retry(endpoint: &str, attempt: u32, delay: Duration) {
        warn!(
            endpoint = %endpoint,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Retrying GitHub API request"
        );
    }

    /// Logs a cache hit.
    pub fn on_cache_hit(key: &str) {
        debug!(key = %key, "Serving GitHub API response from cache");
    }

    /// Logs a request rejected by the local rate-limit gate.
    pub fn on_rate_limit_blocked(snapshot: &RateLimitSnapshot) {
        warn!(
            limit = snapshot.limit,
            remaining = snapshot.remaining,
            reset_at = %snapshot.reset_at,
            "Rate limit exhausted, request not sent"
        );
    }

    /// Logs a session being replaced by a newer one.
    pub fn on_session_superseded(old_session: u64, new_session: u64) {
        debug!(
            old_session = old_session,
            new_session = new_session,
            "Superseding repository fetch session"
        );
    }

    /// Logs an automatic retry scheduled by a consumer.
    pub fn on_auto_retry_scheduled(session: u64, retry_count: u32, delay: Duration) {
        info!(
            session = session,
            retry_count = retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling automatic repository fetch retry"
        );
    }
}

/// Sensitive headers that should be redacted in logs.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-github-token",
    "x-access-token",
    "cookie",
    "set-cookie",
];

/// Redacts sensitive values in headers.
pub fn redact_header(name: &str, value: &str) -> String {
    if SENSITIVE_HEADERS.contains(&name.to_lowercase().as_str()) {
        "[REDACTED]".to_string()
    } else {
        value.to_string()
    }
}

/// Result of a lightweight health probe.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// API reachable and not rate limited.
    pub healthy: bool,
    /// Round-trip latency of the probe.
    pub latency: Duration,
    /// Quota after the probe.
    pub rate_limit: RateLimitSnapshot,
    /// User-facing error message if unhealthy.
    pub error: Option<String>,
}
