//! Error types for the importer.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Result type alias for importer operations.
pub type GitHubResult<T> = Result<T, GitHubError>;

/// Error kinds for categorizing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitHubErrorKind {
    // Configuration errors
    /// Missing authentication configuration.
    MissingAuth,
    /// Invalid base URL.
    InvalidBaseUrl,
    /// Invalid configuration.
    InvalidConfiguration,

    // Document errors
    /// Import document is not valid JSON or violates its structure.
    InvalidFormat,
    /// Import/export file could not be read or written.
    FileError,

    // Recovery failures
    /// Rate limited again after one bounded wait.
    RateLimitExceeded,
    /// The credential could not be refreshed.
    AuthenticationExpired,

    // Request errors
    /// Non-success HTTP status without recovery.
    ApiError,
    /// Network failure (timeout, connect, reset).
    TransportError,
    /// Failed to deserialize a response or serialize a request.
    DeserializationError,
    /// GraphQL response carried errors.
    QueryError,

    // Engine errors
    /// A bulk operation already runs against the repository.
    OperationInProgress,
    /// The operation was declined or cancelled.
    Cancelled,
}

impl fmt::Display for GitHubErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAuth => write!(f, "missing_auth"),
            Self::InvalidBaseUrl => write!(f, "invalid_base_url"),
            Self::InvalidConfiguration => write!(f, "invalid_configuration"),
            Self::InvalidFormat => write!(f, "invalid_format"),
            Self::FileError => write!(f, "file_error"),
            Self::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            Self::AuthenticationExpired => write!(f, "authentication_expired"),
            Self::ApiError => write!(f, "api_error"),
            Self::TransportError => write!(f, "transport_error"),
            Self::DeserializationError => write!(f, "deserialization_error"),
            Self::QueryError => write!(f, "query_error"),
            Self::OperationInProgress => write!(f, "operation_in_progress"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Rate limit information extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Maximum requests allowed.
    pub limit: Option<u32>,
    /// Remaining requests in current window.
    pub remaining: Option<u32>,
    /// Time when the rate limit resets.
    pub reset_at: Option<DateTime<Utc>>,
    /// Retry-After header value in seconds (if present).
    pub retry_after: Option<u64>,
    /// Resource category.
    pub resource: Option<String>,
}

/// Operation and target an error belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Logical operation name, e.g. `create_issue`.
    pub operation: String,
    /// Target, e.g. `owner/repo#12`.
    pub target: String,
}

/// Importer error with detailed information.
#[derive(Error, Debug)]
pub struct GitHubError {
    /// Error kind.
    kind: GitHubErrorKind,
    /// Error message.
    message: String,
    /// HTTP status code.
    status_code: Option<u16>,
    /// Operation context.
    context: Option<ErrorContext>,
    /// Rate limit info (if applicable).
    rate_limit: Option<RateLimitInfo>,
    /// Underlying cause.
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for GitHubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)?;
        if let Some(code) = self.status_code {
            write!(f, " (HTTP {})", code)?;
        }
        if let Some(ref ctx) = self.context {
            write!(f, " [{} {}]", ctx.operation, ctx.target)?;
        }
        Ok(())
    }
}

impl GitHubError {
    /// Creates a new error.
    pub fn new(kind: GitHubErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
            context: None,
            rate_limit: None,
            cause: None,
        }
    }

    /// Sets the HTTP status code.
    pub fn with_status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Sets the operation name and target.
    ///
    /// An existing context is kept, so the innermost operation wins.
    pub fn with_context(mut self, operation: impl Into<String>, target: impl Into<String>) -> Self {
        if self.context.is_none() {
            self.context = Some(ErrorContext {
                operation: operation.into(),
                target: target.into(),
            });
        }
        self
    }

    /// Sets the rate limit info.
    pub fn with_rate_limit(mut self, info: RateLimitInfo) -> Self {
        self.rate_limit = Some(info);
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Gets the error kind.
    pub fn kind(&self) -> GitHubErrorKind {
        self.kind
    }

    /// Gets the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Gets the HTTP status code.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Gets the operation context.
    pub fn context(&self) -> Option<&ErrorContext> {
        self.context.as_ref()
    }

    /// Gets the rate limit info.
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        self.rate_limit.as_ref()
    }

    /// Returns true if the whole bulk operation must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            GitHubErrorKind::AuthenticationExpired | GitHubErrorKind::Cancelled
        )
    }

    // Convenience constructors

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::InvalidConfiguration, message)
    }

    /// Creates an invalid document error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::InvalidFormat, message)
    }

    /// Creates a file error.
    pub fn file(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::FileError, message)
    }

    /// Creates an API error from a status code and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::ApiError, message).with_status(status)
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::TransportError, message)
    }

    /// Creates a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::DeserializationError, message)
    }

    /// Creates an authentication expired error.
    pub fn authentication_expired(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::AuthenticationExpired, message).with_status(401)
    }

    /// Creates a rate limit error.
    pub fn rate_limit_exceeded(info: Option<RateLimitInfo>) -> Self {
        let error = Self::new(GitHubErrorKind::RateLimitExceeded, "Rate limit exceeded");
        match info {
            Some(info) => error.with_rate_limit(info),
            None => error,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(GitHubErrorKind::Cancelled, message)
    }
}

/// Formats an `owner/repo` target.
pub fn repo_target(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner, repo)
}

/// Formats an `owner/repo#number` target.
pub fn item_target(owner: &str, repo: &str, number: u64) -> String {
    format!("{}/{}#{}", owner, repo, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GitHubError::api(404, "Not Found")
            .with_context("create_issue", item_target("octo", "demo", 3));

        let display = format!("{}", error);
        assert!(display.contains("api_error"));
        assert!(display.contains("Not Found"));
        assert!(display.contains("404"));
        assert!(display.contains("create_issue octo/demo#3"));
    }

    #[test]
    fn test_innermost_context_wins() {
        let error = GitHubError::transport("reset")
            .with_context("delete_issue", "I_1")
            .with_context("bulk_delete_issues", "octo/demo");

        let ctx = error.context().unwrap();
        assert_eq!(ctx.operation, "delete_issue");
        assert_eq!(ctx.target, "I_1");
    }

    #[test]
    fn test_is_fatal() {
        assert!(GitHubError::authentication_expired("refresh failed").is_fatal());
        assert!(GitHubError::cancelled("declined").is_fatal());
        assert!(!GitHubError::rate_limit_exceeded(None).is_fatal());
        assert!(!GitHubError::api(422, "Validation Failed").is_fatal());
    }
}
