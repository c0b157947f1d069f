//! In-memory response cache with per-endpoint freshness windows.
//!
//! Entries are keyed by `"{METHOD}:{endpoint}"`. The cache holds at most
//! `capacity` entries and evicts in insertion order when full. Time is read
//! from `tokio::time::Instant` so paused-clock tests can advance it.

use crate::config::CacheConfig;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Freshness category of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointCategory {
    /// Repository listings and repository records.
    Repositories,
    /// A single user profile.
    UserProfile,
    /// Anything else.
    Other,
}

impl EndpointCategory {
    /// Categorizes an endpoint path (query string ignored).
    pub fn of(endpoint: &str) -> Self {
        let path = endpoint.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            ["users", _] => Self::UserProfile,
            _ if segments.contains(&"repos") => Self::Repositories,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedEntry {
    payload: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CachedEntry>,
    order: VecDeque<String>,
}

impl CacheInner {
    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// Bounded cache of successful GET payloads.
#[derive(Debug)]
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResponseCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            config,
        }
    }

    /// Builds the cache key for a request.
    pub fn key(method: &Method, endpoint: &str) -> String {
        format!("{}:{}", method.as_str(), endpoint)
    }

    /// Freshness window for a cache key.
    pub fn freshness_window(&self, key: &str) -> Duration {
        let endpoint = key.split_once(':').map(|(_, e)| e).unwrap_or(key);
        match EndpointCategory::of(endpoint) {
            EndpointCategory::Repositories => self.config.repositories_ttl,
            EndpointCategory::UserProfile => self.config.user_ttl,
            EndpointCategory::Other => self.config.default_ttl,
        }
    }

    /// Returns the payload if present and still fresh. Stale entries are dropped.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.payload.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a payload, evicting the oldest insertion if the cache is full.
    pub fn set(&self, key: impl Into<String>, payload: Value) {
        let key = key.into();
        let entry = CachedEntry {
            payload,
            stored_at: Instant::now(),
            ttl: self.freshness_window(&key),
        };

        let mut inner = self.inner.lock();
        inner.remove(&key);

        while inner.entries.len() >= self.config.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        inner.order.push_back(key.clone());
        inner.entries.insert(key, entry);
    }

    /// Removes a single entry, if present.
    pub fn remove(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
