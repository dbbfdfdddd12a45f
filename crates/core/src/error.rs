//! Error types for the Quarry domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all Quarry operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Generation (classified) errors ---
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    // --- Knowledge collaborator errors ---
    #[error("Knowledge service error: {0}")]
    Knowledge(#[from] KnowledgeError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Request validation ---
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // --- Lifecycle ---
    #[error("Research cancelled")]
    Cancelled,

    #[error("Research deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures surfaced by a model-provider client.
///
/// Variants are as specific as the provider lets us be; `ApiError` is the
/// catch-all for unstructured bodies and is the only variant the retry
/// classifier inspects by text.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("Response blocked by content filter: {0}")]
    ContentFiltered(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Malformed provider output: {0}")]
    MalformedOutput(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(", retry after {}ms", d.as_millis()),
        None => String::new(),
    }
}

/// The classified outcome of a generation call that could not be completed.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Content was blocked by the provider's safety filter")]
    ContentFilter { message: String },

    #[error("Model '{model}' is unavailable: {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("Model returned an invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Primary generation failed ({primary}) and fallback failed ({fallback})")]
    FallbackFailed {
        primary: Box<GenerationError>,
        fallback: Box<GenerationError>,
    },

    #[error("Generation failed: {message}")]
    Unknown {
        message: String,
        #[source]
        cause: Option<ProviderError>,
    },
}

impl GenerationError {
    /// Whether this kind of failure is retryable at the type level.
    ///
    /// `ModelUnavailable` reports `true` here but the retry policy still
    /// fails fast on it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::ModelUnavailable { .. }
        )
    }

    /// Short machine-readable kind, used in logs and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "rate_limit",
            Self::ContentFilter { .. } => "content_filter",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::FallbackFailed { .. } => "fallback_failed",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// A message safe to show an end user (no provider internals).
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimit { .. } => {
                "The AI provider is rate limiting requests. Please try again shortly.".into()
            }
            Self::ContentFilter { .. } => {
                "The response was blocked by the content filter. Try rephrasing the request."
                    .into()
            }
            Self::ModelUnavailable { model, .. } => {
                format!("The model '{model}' is not available.")
            }
            Self::InvalidResponse { .. } => "The AI returned a malformed response.".into(),
            Self::FallbackFailed { primary, .. } => primary.user_message(),
            Self::Unknown { message, .. } => message.clone(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum KnowledgeError {
    #[error("Knowledge service request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Knowledge service unreachable: {0}")]
    Network(String),

    #[error("Unexpected knowledge service payload: {0}")]
    InvalidPayload(String),

    #[error("Knowledge service not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 503,
            message: "Service Unavailable".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("Service Unavailable"));
    }

    #[test]
    fn rate_limited_display_includes_retry_after() {
        let err = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(err.to_string().contains("3000ms"));

        let err = ProviderError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "Rate limited by provider");
    }

    #[test]
    fn retryable_flags() {
        let rate = GenerationError::RateLimit {
            message: "429".into(),
            retry_after: None,
        };
        let filter = GenerationError::ContentFilter {
            message: "blocked".into(),
        };
        let missing = GenerationError::ModelUnavailable {
            model: "gpt-x".into(),
            message: "not found".into(),
        };
        assert!(rate.is_retryable());
        assert!(!filter.is_retryable());
        assert!(missing.is_retryable());
    }

    #[test]
    fn fallback_failed_user_message_uses_primary() {
        let err = GenerationError::FallbackFailed {
            primary: Box::new(GenerationError::ContentFilter {
                message: "safety".into(),
            }),
            fallback: Box::new(GenerationError::Unknown {
                message: "boom".into(),
                cause: None,
            }),
        };
        assert!(err.user_message().contains("content filter"));
        assert_eq!(err.kind(), "fallback_failed");
    }

    #[test]
    fn tool_error_wraps_knowledge_error() {
        let err: ToolError = KnowledgeError::Network("connection refused".into()).into();
        assert!(err.to_string().contains("connection refused"));
    }
}
