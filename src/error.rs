use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed or incomplete inbound message
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection loss, timeout or deadlock inside a store transaction
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Missing or invalid startup configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Broker connection or channel went away
    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    /// Broker protocol errors that are not a lost connection
    #[error("Messaging error: {0}")]
    Messaging(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether redelivering the same message can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Validation(_) | AppError::Configuration(_) => false,
            AppError::TransientStore(_)
            | AppError::ConnectionLost(_)
            | AppError::Messaging(_)
            | AppError::Io(_)
            | AppError::Timeout(_)
            | AppError::Internal(_) => true,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::TransientStore(_) => "TRANSIENT_STORE_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::ConnectionLost(_) => "CONNECTION_LOST",
            AppError::Messaging(_) => "MESSAGING_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
///
/// Only configuration structs derive `Validate`, so a failure here is a
/// startup precondition rather than a bad message.
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
