//! Error handling for the sealing engine
//!
//! Covers sealing, protocol, and transport failures with proper context so a
//! bad accelerator attempt never takes the whole node down.

use thiserror::Error;

/// Result type alias for sealing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sealing engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON configuration parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors, including failure to obtain a secure nonce seed
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Target derivation errors
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// Header validation errors
    #[error("Invalid header: {message}")]
    Header { message: String },

    /// Accelerator wire protocol errors
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Network errors talking to the accelerator
    #[error("Network error: {message}")]
    Network { message: String },

    /// Search worker errors
    #[error("Worker error: {worker_type}: {message}")]
    Worker { worker_type: String, message: String },

    /// Cancellation of async operations
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create a header error
    pub fn header(message: impl Into<String>) -> Self {
        Self::Header {
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_type: worker_type.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if error is retryable with a fresh sealing attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::Io(_) | Error::Protocol { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Yaml(_) => "yaml",
            Error::Json(_) => "json",
            Error::Config { .. } => "config",
            Error::Target { .. } => "target",
            Error::Header { .. } => "header",
            Error::Protocol { .. } => "protocol",
            Error::Network { .. } => "network",
            Error::Worker { .. } => "worker",
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}
