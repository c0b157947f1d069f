//! Consumption controller.
//!
//! Owns the fetch lifecycle for one consumer: sessions, automatic retries,
//! supersession and teardown. Renderers read [`RepositoriesView`] snapshots
//! either on demand or through a watch channel.
//!
//! Sessions run as spawned Tokio tasks, so the triggering methods must be
//! called from within a runtime.

use crate::errors::ClassifiedError;
use crate::observability::{HealthReport, TracingHooks};
use crate::resilience::{RateLimitSnapshot, RetryPolicy};
use crate::services::{ListOptions, RepositoriesService, DEFAULT_PAGE_SIZE};
use crate::types::{RepositorySummary, SortKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default interval between automatic refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(300_000);

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Client-side sort order.
    pub sort: SortKey,
    /// Items per page.
    pub page_size: u32,
    /// Page number.
    pub page: u32,
    /// Keep forks.
    pub include_forks: bool,
    /// Keep private repositories.
    pub include_private: bool,
    /// Periodically refresh in the background.
    pub auto_refresh: bool,
    /// Interval between automatic refreshes.
    pub refresh_interval: Duration,
    /// Budget and backoff for automatic session retries. Independent of the
    /// fetch client's own retry policy.
    pub retry_policy: RetryPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            sort: SortKey::default(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
            include_forks: false,
            include_private: false,
            auto_refresh: false,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl ControllerOptions {
    /// Sets the sort order.
    pub fn sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Enables background refresh every `interval`.
    pub fn auto_refresh(mut self, interval: Duration) -> Self {
        self.auto_refresh = true;
        self.refresh_interval = interval;
        self
    }

    fn list_options(&self) -> ListOptions {
        ListOptions {
            sort: self.sort,
            page_size: self.page_size,
            page: self.page,
            include_forks: self.include_forks,
            include_private: self.include_private,
        }
    }
}

/// Lifecycle status of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Nothing fetched yet.
    #[default]
    Idle,
    /// A request is in flight.
    Loading,
    /// The last request succeeded.
    Success,
    /// The last request failed.
    Error,
}

/// Mutable state of one logical fetch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchSessionState {
    /// Repositories from the last successful fetch.
    pub repositories: Vec<RepositorySummary>,
    /// Whether a request is in flight.
    pub loading: bool,
    /// Error from the last failed fetch.
    pub error: Option<ClassifiedError>,
    /// Automatic retries used in this session.
    pub retry_count: u32,
    /// When the last successful fetch completed.
    pub last_fetch_at: Option<DateTime<Utc>>,
}

/// Read-only view handed to renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoriesView {
    /// Repositories from the last successful fetch.
    pub repositories: Vec<RepositorySummary>,
    /// Whether a request is in flight.
    pub loading: bool,
    /// Error from the last failed fetch.
    pub error: Option<ClassifiedError>,
    /// Automatic retries used in this session.
    pub retry_count: u32,
    /// When the last successful fetch completed.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Succeeded with zero results.
    pub is_empty: bool,
    /// Succeeded with at least one result.
    pub has_data: bool,
    /// Error present, retryable and under the retry budget.
    pub can_retry: bool,
    /// Quota at the time of the view.
    pub rate_limit: RateLimitSnapshot,
}

struct ActiveSession {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct ControllerState {
    session: FetchSessionState,
    status: SessionStatus,
    session_id: u64,
    active: Option<ActiveSession>,
    auto_refresh: Option<JoinHandle<()>>,
    closed: bool,
}

struct Inner {
    service: RepositoriesService,
    username: String,
    options: ControllerOptions,
    state: Mutex<ControllerState>,
    views: watch::Sender<RepositoriesView>,
}

/// Drives repository fetches for a single consumer.
///
/// Dropping the controller cancels all of its background work.
pub struct RepositoriesController {
    inner: Arc<Inner>,
}

impl RepositoriesController {
    /// Creates an idle controller. Nothing is fetched until [`fetch`](Self::fetch).
    pub fn new(
        service: RepositoriesService,
        username: impl Into<String>,
        options: ControllerOptions,
    ) -> Self {
        let state = ControllerState {
            session: FetchSessionState::default(),
            status: SessionStatus::Idle,
            session_id: 0,
            active: None,
            auto_refresh: None,
            closed: false,
        };
        let initial = build_view(&state, &options, service.rate_limit_snapshot());
        let (views, _) = watch::channel(initial);

        Self {
            inner: Arc::new(Inner {
                service,
                username: username.into(),
                options,
                state: Mutex::new(state),
                views,
            }),
        }
    }

    /// Starts a fresh session, superseding any in-flight one.
    pub fn fetch(&self) {
        Inner::start_session(&self.inner, true);
        Inner::ensure_auto_refresh(&self.inner);
    }

    /// Re-enters loading, keeping the automatic retry counter.
    pub fn retry(&self) {
        Inner::start_session(&self.inner, false);
        Inner::ensure_auto_refresh(&self.inner);
    }

    /// Clears the cache and starts a fresh session.
    pub fn refresh(&self) {
        self.inner.service.clear_cache();
        Inner::start_session(&self.inner, true);
        Inner::ensure_auto_refresh(&self.inner);
    }

    /// Drops every cached response.
    pub fn clear_cache(&self) {
        self.inner.service.clear_cache();
    }

    /// Probes the API and republishes the view with the updated quota.
    pub async fn check_health(&self) -> HealthReport {
        let report = self.inner.service.check_health().await;
        self.inner.publish(&self.inner.state.lock());
        report
    }

    /// Gets the current view.
    pub fn view(&self) -> RepositoriesView {
        let state = self.inner.state.lock();
        self.inner.view_of(&state)
    }

    /// Subscribes to view updates.
    pub fn subscribe(&self) -> watch::Receiver<RepositoriesView> {
        self.inner.views.subscribe()
    }

    /// Gets the current quota.
    pub fn rate_limit_snapshot(&self) -> RateLimitSnapshot {
        self.inner.service.rate_limit_snapshot()
    }

    /// Gets the username this controller fetches for.
    pub fn username(&self) -> &str {
        &self.inner.username
    }

    /// Cancels in-flight work, pending retries and auto-refresh.
    ///
    /// Later triggers are ignored.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
            active.handle.abort();
        }
        if let Some(handle) = state.auto_refresh.take() {
            handle.abort();
        }
        state.session.loading = false;
        if state.status == SessionStatus::Loading {
            state.status = SessionStatus::Idle;
        }
        self.inner.publish(&state);
        debug!(username = %self.inner.username, "Repositories controller shut down");
    }
}

impl Drop for RepositoriesController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn start_session(inner: &Arc<Self>, reset: bool) {
        let mut state = inner.state.lock();
        if state.closed {
            return;
        }

        state.session_id += 1;
        let id = state.session_id;

        if let Some(active) = state.active.take() {
            active.cancel.cancel();
            active.handle.abort();
            TracingHooks::on_session_superseded(active.id, id);
        }

        if reset {
            state.session = FetchSessionState::default();
        }
        state.session.loading = true;
        state.session.error = None;
        state.status = SessionStatus::Loading;
        inner.publish(&state);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run_session(Arc::clone(inner), id, cancel.clone()));
        state.active = Some(ActiveSession { id, cancel, handle });
    }

    async fn run_session(inner: Arc<Self>, id: u64, cancel: CancellationToken) {
        let policy = &inner.options.retry_policy;
        let fetch_policy = inner.service.client().config().retry.clone();
        let list_options = inner.options.list_options();

        loop {
            let result = inner
                .service
                .list_repositories_with(
                    &inner.username,
                    &list_options,
                    &fetch_policy,
                    cancel.child_token(),
                )
                .await;

            let (delay, retry_count) = {
                let mut state = inner.state.lock();
                if state.session_id != id || cancel.is_cancelled() {
                    return;
                }

                match result {
                    Ok(repositories) => {
                        info!(
                            username = %inner.username,
                            session = id,
                            count = repositories.len(),
                            "Repositories loaded"
                        );
                        state.session.repositories = repositories;
                        state.session.loading = false;
                        state.session.error = None;
                        state.session.retry_count = 0;
                        state.session.last_fetch_at = Some(Utc::now());
                        state.status = SessionStatus::Success;
                        state.active = None;
                        inner.publish(&state);
                        return;
                    }
                    Err(error) => {
                        let retry_count = state.session.retry_count;
                        let auto_retry = error.is_retryable()
                            && error.is_recoverable()
                            && retry_count < policy.max_retries;
                        debug!(
                            username = %inner.username,
                            session = id,
                            error = %error.details(),
                            auto_retry = auto_retry,
                            "Repository fetch failed"
                        );
                        state.session.loading = false;
                        state.session.error = Some(error);
                        state.status = SessionStatus::Error;
                        if !auto_retry {
                            state.active = None;
                        }
                        inner.publish(&state);

                        if !auto_retry {
                            return;
                        }
                        (policy.backoff_delay(retry_count), retry_count + 1)
                    }
                }
            };

            TracingHooks::on_auto_retry_scheduled(id, retry_count, delay);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let mut state = inner.state.lock();
            if state.session_id != id || cancel.is_cancelled() {
                return;
            }
            state.session.retry_count = retry_count;
            state.session.loading = true;
            state.session.error = None;
            state.status = SessionStatus::Loading;
            inner.publish(&state);
        }
    }

    fn ensure_auto_refresh(inner: &Arc<Self>) {
        if !inner.options.auto_refresh {
            return;
        }
        let mut state = inner.state.lock();
        if state.closed || state.auto_refresh.is_some() {
            return;
        }
        let period = inner.options.refresh_interval.max(Duration::from_millis(1));
        state.auto_refresh = Some(tokio::spawn(Self::auto_refresh_loop(
            Arc::downgrade(inner),
            period,
        )));
    }

    async fn auto_refresh_loop(weak: Weak<Self>, period: Duration) {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            ticks.tick().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!(username = %inner.username, "Auto-refreshing repositories");
            inner.service.clear_cache();
            Self::start_session(&inner, true);
        }
    }

    fn view_of(&self, state: &ControllerState) -> RepositoriesView {
        build_view(state, &self.options, self.service.rate_limit_snapshot())
    }

    fn publish(&self, state: &ControllerState) {
        self.views.send_replace(self.view_of(state));
    }
}

fn build_view(
    state: &ControllerState,
    options: &ControllerOptions,
    rate_limit: RateLimitSnapshot,
) -> RepositoriesView {
    let session = &state.session;
    let succeeded = state.status == SessionStatus::Success;
    let can_retry = session.error.as_ref().map_or(false, |e| {
        e.is_retryable() && session.retry_count < options.retry_policy.max_retries
    });

    RepositoriesView {
        repositories: session.repositories.clone(),
        loading: session.loading,
        error: session.error.clone(),
        retry_count: session.retry_count,
        last_fetch_at: session.last_fetch_at,
        status: state.status,
        is_empty: succeeded && session.repositories.is_empty(),
        has_data: succeeded && !session.repositories.is_empty(),
        can_retry,
        rate_limit,
    }
}
