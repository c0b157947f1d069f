//! Wire records and the domain records derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Repository record as returned by `/users/{username}/repos`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRepository {
    /// Repository ID.
    pub id: u64,
    /// Repository name.
    pub name: String,
    /// Repository description.
    pub description: Option<String>,
    /// Whether the repository is a fork.
    #[serde(default)]
    pub fork: bool,
    /// Whether the repository is private.
    #[serde(default)]
    pub private: bool,
    /// Topics.
    #[serde(default)]
    pub topics: Vec<String>,
    /// HTML URL.
    pub html_url: String,
    /// Homepage URL.
    pub homepage: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Primary language.
    pub language: Option<String>,
    /// Stargazer count.
    #[serde(default)]
    pub stargazers_count: u32,
    /// Fork count.
    #[serde(default)]
    pub forks_count: u32,
    /// Repository size in KB.
    #[serde(default)]
    pub size: u64,
}

/// Repository as presented to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySummary {
    /// Repository ID.
    pub id: u64,
    /// Repository name.
    pub name: String,
    /// Repository description.
    pub description: Option<String>,
    /// Topics, in API order.
    pub topics: Vec<String>,
    /// Repository page.
    pub url: String,
    /// Project homepage.
    pub homepage_url: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Primary language.
    pub language: Option<String>,
    /// Stargazer count.
    pub star_count: u32,
    /// Fork count.
    pub fork_count: u32,
    /// Size in KB.
    pub size: u64,
    /// Whether the repository is a fork.
    pub is_fork: bool,
    /// Whether the repository is private.
    pub is_private: bool,
}

impl From<ApiRepository> for RepositorySummary {
    fn from(repo: ApiRepository) -> Self {
        Self {
            id: repo.id,
            name: repo.name,
            description: repo.description,
            topics: repo.topics,
            url: repo.html_url,
            homepage_url: repo.homepage.filter(|h| !h.trim().is_empty()),
            updated_at: repo.updated_at,
            created_at: repo.created_at,
            language: repo.language,
            star_count: repo.stargazers_count,
            fork_count: repo.forks_count,
            size: repo.size,
            is_fork: repo.fork,
            is_private: repo.private,
        }
    }
}

/// Public profile from `/users/{username}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Username (login).
    pub login: String,
    /// User ID.
    pub id: u64,
    /// Display name.
    pub name: Option<String>,
    /// Avatar URL.
    pub avatar_url: String,
    /// Profile URL.
    pub html_url: String,
    /// Profile bio.
    pub bio: Option<String>,
    /// Public repository count.
    #[serde(default)]
    pub public_repos: u32,
    /// Follower count.
    #[serde(default)]
    pub followers: u32,
    /// Following count.
    #[serde(default)]
    pub following: u32,
    /// Account creation time.
    pub created_at: Option<DateTime<Utc>>,
}

/// Client-side sort order for repository listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Most recently updated first.
    #[default]
    Updated,
    /// Most stars first.
    Stars,
    /// Most forks first.
    Forks,
    /// Most recently created first.
    Created,
    /// Largest first.
    Size,
}

impl SortKey {
    /// Sort parameter understood by the API. Keys the API lacks fall back to `updated`.
    pub fn api_param(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated | Self::Stars | Self::Forks | Self::Size => "updated",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated => write!(f, "updated"),
            Self::Stars => write!(f, "stars"),
            Self::Forks => write!(f, "forks"),
            Self::Created => write!(f, "created"),
            Self::Size => write!(f, "size"),
        }
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "updated" => Ok(Self::Updated),
            "stars" => Ok(Self::Stars),
            "forks" => Ok(Self::Forks),
            "created" => Ok(Self::Created),
            "size" => Ok(Self::Size),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_from_wire_record() {
        let raw: ApiRepository = serde_json::from_value(json!({
            "id": 7,
            "name": "hello-world",
            "description": null,
            "fork": true,
            "private": false,
            "topics": ["rust", "cli"],
            "html_url": "https://github.com/octocat/hello-world",
            "homepage": "",
            "updated_at": "2024-03-01T10:00:00Z",
            "created_at": "2020-01-01T00:00:00Z",
            "language": "Rust",
            "stargazers_count": 12,
            "forks_count": 3,
            "size": 512,
            "owner": {"login": "octocat"}
        }))
        .unwrap();

        let summary = RepositorySummary::from(raw);
        assert_eq!(summary.name, "hello-world");
        assert_eq!(summary.topics, vec!["rust", "cli"]);
        assert_eq!(summary.homepage_url, None);
        assert!(summary.is_fork);
        assert!(!summary.is_private);
        assert_eq!(summary.star_count, 12);
        assert_eq!(summary.url, "https://github.com/octocat/hello-world");
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!("Stars".parse::<SortKey>().unwrap(), SortKey::Stars);
        assert_eq!(SortKey::default(), SortKey::Updated);
        assert!("popularity".parse::<SortKey>().is_err());
        assert_eq!(SortKey::Size.api_param(), "updated");
        assert_eq!(SortKey::Created.to_string(), "created");
    }
}
