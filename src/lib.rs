//! # GitHub Repositories Integration Library
//!
//! A resilient client for listing a user's GitHub repositories with:
//! - Typed error classification with fixed user-facing messages
//! - Rate limit tracking from response headers with a local request gate
//! - Per-endpoint response caching with bounded size
//! - Retries with exponential backoff and jitter
//! - A per-consumer controller with automatic retries, supersession and teardown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_github_repos::{ControllerOptions, FetchClient, RepositoriesController, SortKey};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(FetchClient::builder().pat("ghp_xxxxxxxxxxxx").build()?);
//!
//!     let controller = RepositoriesController::new(
//!         client.repositories(),
//!         "octocat",
//!         ControllerOptions::default().sort(SortKey::Stars),
//!     );
//!     controller.fetch();
//!
//!     let mut views = controller.subscribe();
//!     let view = views.wait_for(|v| !v.loading).await?.clone();
//!     for repo in &view.repositories {
//!         println!("{} ({} stars)", repo.name, repo.star_count);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod types;

// Authentication
pub mod auth;

// HTTP client and transport
pub mod client;
pub mod transport;

// Response caching
pub mod cache;

// API Services
pub mod services;

// Consumer lifecycle
pub mod controller;

// Resilience patterns
pub mod resilience;

// Observability
pub mod observability;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use auth::AuthMethod;
pub use cache::{EndpointCategory, ResponseCache};
pub use client::{ApiContext, FetchClient, FetchClientBuilder, RequestOptions};
pub use config::{CacheConfig, ClientConfig, ClientConfigBuilder};
pub use controller::{
    ControllerOptions, FetchSessionState, RepositoriesController, RepositoriesView, SessionStatus,
};
pub use errors::{classify, ClassifiedError, ErrorKind, GitHubResult, RawFailure};
pub use observability::HealthReport;
pub use resilience::{RateLimitSnapshot, RateLimitTracker, RetryPolicy};
pub use services::{ListOptions, RepositoriesService};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::*;
