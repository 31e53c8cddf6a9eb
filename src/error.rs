// Error handling module
// Defines the client-side error taxonomy

use thiserror::Error;

/// Errors surfaced by the API client
#[derive(Error, Debug)]
pub enum ApiError {
    /// Terminal authentication failure (failed refresh, or 401 after one retry)
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Non-2xx response from the backend, passed through unchanged
    #[error("API error: {status} - {message}")]
    BackendError { status: u16, message: String },

    /// Request rejected before it was sent
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport-level failure (connect, timeout, decode)
    #[error("Transport error: {0}")]
    TransportError(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
