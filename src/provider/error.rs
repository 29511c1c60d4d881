//! Provider-specific error types.
//!
//! Structured errors for compute provider calls. The session turns any of
//! these into a provisioning failure while a target is being started.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed (invalid token, expired credentials, etc.)
    #[error("Authentication failed for {provider}: {message}")]
    Authentication { provider: String, message: String },

    /// Rate limit exceeded - includes optional retry-after duration
    #[error("Rate limit exceeded{}", .retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimit { retry_after: Option<Duration> },

    #[error("{resource_type} not found: {id}")]
    NotFound { resource_type: String, id: String },

    /// The platform refused the request because an account limit was hit
    #[error("Quota exceeded for {resource}: {message}")]
    QuotaExceeded { resource: String, message: String },

    /// Invalid configuration or request parameters (bad subnet, unknown size, ...)
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig { field: String, message: String },

    #[error("Operation timed out after {elapsed:?}: {operation}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// API returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unknown provider: {name}. Supported providers: {supported:?}")]
    UnknownProvider {
        name: String,
        supported: Vec<String>,
    },

    #[error("{message}")]
    Other { message: String },
}

impl ProviderError {
    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Authentication {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    pub fn quota(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Map an unsuccessful HTTP response to the closest structured error.
    pub fn from_response(
        provider: &str,
        operation: &str,
        status: u16,
        retry_after: Option<Duration>,
        body: &str,
    ) -> Self {
        let message = format!("{}: {}", operation, body.trim());
        match status {
            401 | 403 => Self::auth(provider, message),
            429 => Self::RateLimit { retry_after },
            422 if body.contains("limit") => Self::quota(operation, body.trim()),
            400 | 422 => Self::invalid_config(operation, body.trim()),
            _ => Self::api(status, message),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Timeout { .. } | Self::Network(_)
        )
    }
}

/// Result type alias for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
