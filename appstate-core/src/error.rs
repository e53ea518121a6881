/*!
Error types for the appstate core engine.
*/

use thiserror::Error;

/// Result type used throughout the appstate core.
pub type Result<T> = std::result::Result<T, AppStateError>;

/// Errors raised by transports, providers and the legacy preferences medium.
///
/// The [`StateManager`](crate::StateManager) never returns these from its
/// lifecycle operations; it logs them and records per-provider failures in its
/// reports. They surface from the collaborators themselves and from setup calls
/// such as provider registration and configuration validation.
#[derive(Error, Debug)]
pub enum AppStateError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport load/save failures
    #[error("Transport error: {0}")]
    Transport(String),

    /// A state provider failed to capture or apply its state
    #[error("Provider '{id}' failed: {message}")]
    Provider { id: String, message: String },

    /// A provider with the same id is already registered
    #[error("Provider '{0}' is already registered")]
    DuplicateProvider(String),

    /// Legacy preferences medium errors
    #[error("Legacy storage error: {0}")]
    Legacy(String),

    /// Document has an unexpected shape
    #[error("Invalid state document: {0}")]
    InvalidFormat(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppStateError {
    /// Create a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new provider error
    pub fn provider<I: Into<String>, S: Into<String>>(id: I, msg: S) -> Self {
        Self::Provider {
            id: id.into(),
            message: msg.into(),
        }
    }

    /// Create a new legacy storage error
    pub fn legacy<S: Into<String>>(msg: S) -> Self {
        Self::Legacy(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }
}
