//! Error classification for the repository access layer.
//!
//! Every failure the layer can observe (HTTP status, transport failure,
//! timeout, abort, caller misuse) is folded into a [`ClassifiedError`] with a
//! closed [`ErrorKind`], retry metadata and a fixed user-facing message.

use crate::resilience::RateLimitSnapshot;
use std::fmt;
use thiserror::Error;

/// Result type alias for repository access operations.
pub type GitHubResult<T> = Result<T, ClassifiedError>;

/// Closed set of error categories surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The network could not be reached or the connection failed.
    Network,
    /// The request timed out or was aborted.
    Timeout,
    /// The server-side request quota is exhausted.
    RateLimit,
    /// Credentials were rejected (401).
    Unauthorized,
    /// Access is forbidden while quota remains (403).
    Forbidden,
    /// The user or resource does not exist (404).
    NotFound,
    /// The request was malformed or the caller passed invalid input.
    Validation,
    /// The server failed (5xx).
    ServerError,
    /// Any other non-success status.
    ApiError,
    /// Anything that fits no other category, e.g. an undecodable body.
    Unknown,
}

impl ErrorKind {
    /// Whether the fetch layer may retry this kind with backoff.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::RateLimit
                | Self::NotFound
                | Self::Validation
                | Self::Unauthorized
                | Self::Forbidden
        )
    }

    /// Whether a consumer may schedule an automatic retry cycle.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::ServerError)
    }

    /// Fixed, non-technical message shown to end users.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::Network => "Unable to reach GitHub. Check your connection and try again.",
            Self::Timeout => "GitHub took too long to respond. Please try again.",
            Self::RateLimit => {
                "GitHub's request limit has been reached. Please wait before trying again."
            }
            Self::Unauthorized => "GitHub rejected the configured credentials.",
            Self::Forbidden => "Access to this GitHub resource is forbidden.",
            Self::NotFound => "The requested GitHub user or repository could not be found.",
            Self::Validation => "The request was invalid. Please check the username and options.",
            Self::ServerError => "GitHub is having trouble right now. Please try again later.",
            Self::ApiError => "GitHub returned an unexpected response.",
            Self::Unknown => "Something went wrong while loading repositories.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::NotFound => write!(f, "not_found"),
            Self::Validation => write!(f, "validation"),
            Self::ServerError => write!(f, "server_error"),
            Self::ApiError => write!(f, "api_error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failure as observed, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    /// A completed response with a non-success status.
    Http {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, or a synthesized one.
        message: String,
    },
    /// The per-request deadline elapsed.
    Timeout,
    /// The request was cancelled through its abort signal.
    Aborted,
    /// The transport failed without producing a response.
    Transport(String),
    /// The response body could not be decoded.
    Decode(String),
    /// The caller supplied invalid input.
    Validation(String),
}

/// A classified, immutable error with retry metadata.
///
/// `Display` yields only the fixed user message; technical detail is behind
/// [`ClassifiedError::details`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{user_message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    http_status: Option<u16>,
    retry_after_seconds: Option<u64>,
    retryable: bool,
    recoverable: bool,
    user_message: &'static str,
}

impl ClassifiedError {
    /// Creates an error of the given kind with a technical message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            http_status: None,
            retry_after_seconds: None,
            retryable: kind.is_retryable(),
            recoverable: kind.is_recoverable(),
            user_message: kind.user_message(),
        }
    }

    /// Sets the HTTP status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Sets the suggested wait before retrying.
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Gets the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Gets the technical message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the HTTP status, if the failure came from a response.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// Gets the suggested wait in seconds, if known.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after_seconds
    }

    /// Returns true if the fetch layer may retry this error.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Returns true if a consumer may schedule an automatic retry.
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Gets the fixed user-facing message.
    pub fn user_message(&self) -> &'static str {
        self.user_message
    }

    /// Technical detail for an explicit "show details" action.
    pub fn details(&self) -> String {
        let mut details = format!("[{}] {}", self.kind, self.message);
        if let Some(status) = self.http_status {
            details.push_str(&format!(" (HTTP {})", status));
        }
        if let Some(seconds) = self.retry_after_seconds {
            details.push_str(&format!(" [retry after {}s]", seconds));
        }
        details
    }

    // Convenience constructors

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates a rate limit error carrying the wait until quota reset.
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::new(ErrorKind::RateLimit, "API rate limit exceeded")
            .with_retry_after(retry_after_seconds)
    }

    /// Creates a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Creates the error returned when a request is cancelled.
    pub fn aborted() -> Self {
        Self::timeout("request aborted")
    }
}

/// Maps a raw failure into a [`ClassifiedError`].
///
/// A 403 is a rate limit only when the last reported quota is exhausted;
/// otherwise it is a plain `forbidden`.
pub fn classify(failure: RawFailure, quota: &RateLimitSnapshot) -> ClassifiedError {
    match failure {
        RawFailure::Http { status, message } => {
            let kind = match status {
                401 => ErrorKind::Unauthorized,
                403 if quota.remaining == 0 => ErrorKind::RateLimit,
                403 => ErrorKind::Forbidden,
                404 => ErrorKind::NotFound,
                422 => ErrorKind::Validation,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::ApiError,
            };
            let error = ClassifiedError::new(kind, message).with_status(status);
            if kind == ErrorKind::RateLimit {
                error.with_retry_after(quota.retry_after_seconds())
            } else {
                error
            }
        }
        RawFailure::Timeout => ClassifiedError::timeout("request timed out"),
        RawFailure::Aborted => ClassifiedError::aborted(),
        RawFailure::Transport(message) => ClassifiedError::new(ErrorKind::Network, message),
        RawFailure::Decode(message) => ClassifiedError::new(ErrorKind::Unknown, message),
        RawFailure::Validation(message) => ClassifiedError::validation(message),
    }
}

/// Checks if an error is a rate limit error.
pub fn is_rate_limit_error(error: &ClassifiedError) -> bool {
    error.kind() == ErrorKind::RateLimit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use test_case::test_case;

    fn quota(remaining: u32) -> RateLimitSnapshot {
        RateLimitSnapshot::new(60, remaining, Utc::now() + Duration::seconds(120))
    }

    #[test_case(401, ErrorKind::Unauthorized ; "unauthorized")]
    #[test_case(404, ErrorKind::NotFound ; "not found")]
    #[test_case(422, ErrorKind::Validation ; "validation")]
    #[test_case(500, ErrorKind::ServerError ; "internal error")]
    #[test_case(503, ErrorKind::ServerError ; "unavailable")]
    #[test_case(418, ErrorKind::ApiError ; "other status")]
    fn test_classify_status(status: u16, expected: ErrorKind) {
        let error = classify(
            RawFailure::Http {
                status,
                message: "boom".to_string(),
            },
            &quota(42),
        );
        assert_eq!(error.kind(), expected);
        assert_eq!(error.http_status(), Some(status));
    }

    #[test]
    fn test_forbidden_with_quota_left() {
        let error = classify(
            RawFailure::Http {
                status: 403,
                message: "Forbidden".to_string(),
            },
            &quota(10),
        );
        assert_eq!(error.kind(), ErrorKind::Forbidden);
        assert!(error.retry_after_seconds().is_none());
    }

    #[test]
    fn test_forbidden_with_quota_exhausted() {
        let error = classify(
            RawFailure::Http {
                status: 403,
                message: "API rate limit exceeded".to_string(),
            },
            &quota(0),
        );
        assert_eq!(error.kind(), ErrorKind::RateLimit);
        let wait = error.retry_after_seconds().unwrap();
        assert!((119..=120).contains(&wait), "wait was {}", wait);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_transport_failures() {
        let q = quota(5);
        assert_eq!(classify(RawFailure::Timeout, &q).kind(), ErrorKind::Timeout);
        assert_eq!(classify(RawFailure::Aborted, &q).kind(), ErrorKind::Timeout);
        assert_eq!(
            classify(RawFailure::Transport("reset".into()), &q).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            classify(RawFailure::Decode("eof".into()), &q).kind(),
            ErrorKind::Unknown
        );
    }

    #[test_case(ErrorKind::Network, true, true)]
    #[test_case(ErrorKind::Timeout, true, true)]
    #[test_case(ErrorKind::ServerError, true, true)]
    #[test_case(ErrorKind::ApiError, true, false)]
    #[test_case(ErrorKind::Unknown, true, false)]
    #[test_case(ErrorKind::RateLimit, false, false)]
    #[test_case(ErrorKind::Unauthorized, false, false)]
    #[test_case(ErrorKind::Forbidden, false, false)]
    #[test_case(ErrorKind::NotFound, false, false)]
    #[test_case(ErrorKind::Validation, false, false)]
    fn test_retry_flags(kind: ErrorKind, retryable: bool, recoverable: bool) {
        let error = ClassifiedError::new(kind, "x");
        assert_eq!(error.is_retryable(), retryable);
        assert_eq!(error.is_recoverable(), recoverable);
    }

    #[test]
    fn test_display_hides_technical_detail() {
        let error = ClassifiedError::new(ErrorKind::ServerError, "upstream 502 from lb-3")
            .with_status(502);

        let display = format!("{}", error);
        assert_eq!(display, ErrorKind::ServerError.user_message());
        assert!(!display.contains("502"));

        let details = error.details();
        assert!(details.contains("server_error"));
        assert!(details.contains("upstream 502 from lb-3"));
        assert!(details.contains("HTTP 502"));
    }
}
