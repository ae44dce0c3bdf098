//! Errors raised by workflow engine calls.

use thiserror::Error;

/// Error codes the engine documents as transient.
const RETRYABLE_ERROR_CODES: &[&str] = &[
    "ThrottlingException",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "InternalFailure",
    "InternalServerError",
    "RequestTimeout",
    "RequestTimeoutException",
];

/// Failure of a single workflow engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The request never produced an HTTP response.
    #[error("{operation} transport error: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    /// The engine answered with an error document.
    #[error("{operation} failed with HTTP {status}: {error_code}: {message}")]
    Service {
        operation: String,
        status: u16,
        error_code: String,
        message: String,
    },

    /// The engine answered with something that is not the expected JSON shape.
    #[error("{operation} returned an unreadable response: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    /// The endpoint configuration cannot be used.
    #[error("invalid engine endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

impl EngineError {
    /// Create a service error.
    pub fn service(operation: impl Into<String>, status: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            operation: operation.into(),
            status,
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    /// Create an invalid endpoint error.
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Whether the client considers this failure transient.
    ///
    /// Connection failures, timeouts, throttling and 5xx answers are retryable;
    /// validation errors and missing resources are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { source, .. } => source.is_connect() || source.is_timeout(),
            EngineError::Service { status, error_code, .. } => {
                *status >= 500 || *status == 429 || RETRYABLE_ERROR_CODES.contains(&error_code.as_str())
            }
            EngineError::Decode { .. } | EngineError::InvalidEndpoint { .. } => false,
        }
    }

    /// Engine error code, when the engine produced one.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            EngineError::Service { error_code, .. } => Some(error_code.as_str()),
            _ => None,
        }
    }
}
