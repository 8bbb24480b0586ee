//! Error taxonomy for gateway operations
//!
//! Retryable kinds (rate limits, invalid responses, timeouts) are absorbed
//! by the retry machinery up to the attempt budget; everything else
//! propagates immediately.

use std::time::Duration;

/// Errors surfaced by gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    #[error("provider '{provider}' rate limited: {message}")]
    RateLimited { provider: String, message: String },

    #[error("invalid response from '{provider}': {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("model not found or not supported by any provider: '{0}'")]
    ModelNotFound(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed after {attempts} attempts")]
    Exhausted {
        attempts: usize,
        #[source]
        source: Box<GatewayError>,
    },
}

/// Discriminant used for retryable-set membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Provider,
    RateLimited,
    InvalidResponse,
    ModelNotFound,
    Timeout,
    Exhausted,
}

impl GatewayError {
    /// Convenience constructor for provider-scoped failures
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for empty or malformed payloads
    pub fn invalid_response(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Provider { .. } => ErrorKind::Provider,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            Self::ModelNotFound(_) => ErrorKind::ModelNotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
        }
    }

    /// Transient failure that is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::InvalidResponse | ErrorKind::Timeout
        )
    }

    /// The innermost error of an exhaustion chain
    pub fn root_cause(&self) -> &GatewayError {
        match self {
            Self::Exhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
