// src/error.rs
// Standardized error types for Loupe

use std::time::Duration;
use thiserror::Error;

/// Provider-level failure categories. Retry eligibility and fallback
/// behavior key off the kind, never off provider-specific error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimit,
    Timeout,
    Authentication,
    BadRequest,
    ModelNotFound,
    PayloadTooLarge,
    Transient,
}

impl ProviderErrorKind {
    /// Whether the adapter may retry a request that failed this way.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::RateLimit | ProviderErrorKind::Timeout | ProviderErrorKind::Transient
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::Authentication => "authentication",
            ProviderErrorKind::BadRequest => "bad_request",
            ProviderErrorKind::ModelNotFound => "model_not_found",
            ProviderErrorKind::PayloadTooLarge => "payload_too_large",
            ProviderErrorKind::Transient => "transient",
        }
    }
}

/// Error returned by an LLM provider call.
#[derive(Debug, Error)]
#[error("provider error ({}): {message}", kind.as_str())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// From the Retry-After header when the provider sent one.
    pub retry_after: Option<Duration>,
    pub request_id: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>, request_id: &str) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
            request_id: request_id.to_string(),
        }
    }
}

/// Tool execution failure categories, returned to the model as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    Timeout,
    ExecutionException,
    InvalidArguments,
    UnknownTool,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::ExecutionException => "execution_exception",
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::UnknownTool => "unknown_tool",
        }
    }
}

/// Main error type for the Loupe library
#[derive(Error, Debug)]
pub enum LoupeError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("vector store error: {0}")]
    Vector(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using LoupeError
pub type Result<T> = std::result::Result<T, LoupeError>;

impl LoupeError {
    /// Category code carried on error frames sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            LoupeError::Validation(_) => "validation_error",
            LoupeError::Provider(e) => e.kind.as_str(),
            LoupeError::Retrieval(_) => "retrieval_error",
            LoupeError::Db(_) => "persistence_error",
            LoupeError::Cancelled => "cancelled",
            LoupeError::Config(_) => "config_error",
            LoupeError::Vector(_) => "vector_error",
            LoupeError::Embedding(_) => "embedding_error",
            _ => "internal_error",
        }
    }
}

impl From<String> for LoupeError {
    fn from(s: String) -> Self {
        LoupeError::Other(s)
    }
}

impl From<tokio::task::JoinError> for LoupeError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            LoupeError::Cancelled
        } else {
            LoupeError::Other(err.to_string())
        }
    }
}

impl From<LoupeError> for String {
    fn from(err: LoupeError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderErrorKind::RateLimit.is_retryable());
        assert!(ProviderErrorKind::Timeout.is_retryable());
        assert!(ProviderErrorKind::Transient.is_retryable());
        assert!(!ProviderErrorKind::Authentication.is_retryable());
        assert!(!ProviderErrorKind::BadRequest.is_retryable());
        assert!(!ProviderErrorKind::PayloadTooLarge.is_retryable());
        assert!(!ProviderErrorKind::ModelNotFound.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(LoupeError::Validation("x".into()).code(), "validation_error");
        assert_eq!(LoupeError::Cancelled.code(), "cancelled");
        let perr = ProviderError::new(ProviderErrorKind::RateLimit, "slow down", "req-1");
        assert_eq!(LoupeError::Provider(perr).code(), "rate_limit");
    }

    #[test]
    fn test_join_error_cancelled_maps_to_cancelled() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let handle = tokio::spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            });
            handle.abort();
            let err = handle.await.unwrap_err();
            assert!(matches!(LoupeError::from(err), LoupeError::Cancelled));
        });
    }
}
