//! Resilience patterns: retry backoff and rate-limit tracking.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Quota assumed when the server does not report one.
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Reset window assumed when the server does not report one.
pub const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(3600);

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

/// Retry policy with exponential backoff and additive jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry (without jitter).
    pub base_delay: Duration,
    /// Cap on the exponential part of the delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given budget and delays, default multiplier and jitter.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Sets the jitter bound.
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Exponential delay for `attempt` (0-based), capped at `max_delay`.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay to wait before retry `attempt + 1`, jitter included.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_backoff(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..bound))
    }
}

/// Last quota reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateLimitState {
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
}

impl RateLimitState {
    fn conservative(now: DateTime<Utc>) -> Self {
        Self {
            limit: DEFAULT_RATE_LIMIT,
            remaining: DEFAULT_RATE_LIMIT,
            reset_at: now + default_reset_window(),
        }
    }
}

fn default_reset_window() -> ChronoDuration {
    ChronoDuration::from_std(DEFAULT_RESET_WINDOW).unwrap_or_else(|_| ChronoDuration::hours(1))
}

/// Point-in-time view of the rate limit, for renderers and classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    /// Maximum requests in the window.
    pub limit: u32,
    /// Remaining requests as last reported.
    pub remaining: u32,
    /// When the quota resets.
    pub reset_at: DateTime<Utc>,
    /// Whether requests are currently blocked.
    pub limited: bool,
    /// Time left until reset.
    pub reset_in: Duration,
}

impl RateLimitSnapshot {
    /// Builds a snapshot evaluated at the current time.
    pub fn new(limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self::at(limit, remaining, reset_at, Utc::now())
    }

    fn at(limit: u32, remaining: u32, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let reset_in = (reset_at - now).to_std().unwrap_or(Duration::ZERO);
        Self {
            limit,
            remaining,
            reset_at,
            limited: remaining == 0 && now < reset_at,
            reset_in,
        }
    }

    /// Seconds until reset, rounded up.
    pub fn retry_after_seconds(&self) -> u64 {
        let secs = self.reset_in.as_secs();
        if self.reset_in.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Shared rate limit tracker.
///
/// Only ever mirrors what the server last reported; `remaining` is never
/// decremented locally.
#[derive(Debug)]
pub struct RateLimitTracker {
    state: Mutex<RateLimitState>,
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitTracker {
    /// Creates a tracker with the conservative default quota.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RateLimitState::conservative(Utc::now())),
        }
    }

    /// Updates the tracked quota from response headers.
    ///
    /// Missing or malformed values fall back to the conservative defaults.
    pub fn record_response_headers(&self, headers: &HeaderMap) {
        let now = Utc::now();
        let fallback = RateLimitState::conservative(now);

        let limit = header_number::<u32>(headers, HEADER_LIMIT).unwrap_or(fallback.limit);
        let remaining =
            header_number::<u32>(headers, HEADER_REMAINING).unwrap_or(fallback.remaining);
        let reset_at = header_number::<i64>(headers, HEADER_RESET)
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or(fallback.reset_at);

        self.record(limit, remaining, reset_at);
    }

    /// Replaces the tracked quota.
    pub fn record(&self, limit: u32, remaining: u32, reset_at: DateTime<Utc>) {
        *self.state.lock() = RateLimitState {
            limit,
            remaining,
            reset_at,
        };
        tracing::debug!(
            limit = limit,
            remaining = remaining,
            reset_at = %reset_at,
            "Rate limit updated"
        );
    }

    /// Gets the remaining requests.
    pub fn remaining(&self) -> u32 {
        self.state.lock().remaining
    }

    /// Gets the reset time.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.state.lock().reset_at
    }

    /// Returns true while the quota is exhausted and the reset is in the future.
    pub fn is_limited(&self) -> bool {
        self.is_limited_at(Utc::now())
    }

    /// Clock-explicit form of [`RateLimitTracker::is_limited`].
    pub fn is_limited_at(&self, now: DateTime<Utc>) -> bool {
        let state = *self.state.lock();
        state.remaining == 0 && now < state.reset_at
    }

    /// Time left until the quota resets, zero if already past.
    pub fn time_until_reset(&self) -> Duration {
        (self.reset_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Gets a consistent snapshot of the tracked quota.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let state = *self.state.lock();
        RateLimitSnapshot::new(state.limit, state.remaining, state.reset_at)
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
