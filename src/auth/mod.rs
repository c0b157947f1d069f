//! Static credential handling.

use secrecy::{ExposeSecret, SecretString};

/// Credential sent as a bearer token.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Personal Access Token (classic or fine-grained).
    Pat(SecretString),
    /// GitHub Actions token (from GITHUB_TOKEN).
    Actions(SecretString),
}

impl AuthMethod {
    /// Creates a PAT authentication method.
    pub fn pat(token: impl Into<String>) -> Self {
        Self::Pat(SecretString::new(token.into()))
    }

    /// Creates a GitHub Actions token authentication method.
    pub fn actions(token: impl Into<String>) -> Self {
        Self::Actions(SecretString::new(token.into()))
    }

    /// Gets the Authorization header value.
    pub fn authorization_header(&self) -> String {
        match self {
            Self::Pat(token) | Self::Actions(token) => {
                format!("Bearer {}", token.expose_secret())
            }
        }
    }

    /// Gets the token prefix for logging.
    pub fn token_prefix(&self) -> &'static str {
        match self {
            Self::Pat(t) => {
                let exposed = t.expose_secret();
                if exposed.starts_with("ghp_") {
                    "ghp_***"
                } else if exposed.starts_with("github_pat_") {
                    "github_pat_***"
                } else {
                    "***"
                }
            }
            Self::Actions(_) => "ghs_***",
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Pat(token) | Self::Actions(token) => token.expose_secret().trim().is_empty(),
        }
    }

    /// Drops blank tokens so they are never sent.
    pub(crate) fn non_blank(self) -> Option<Self> {
        if self.is_blank() {
            None
        } else {
            Some(self)
        }
    }
}
