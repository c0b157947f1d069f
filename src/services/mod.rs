//! GitHub API service implementations.

mod repositories;

pub use repositories::*;
