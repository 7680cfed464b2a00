//! Error types for messaging operations

use crate::error::AppError;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection or channel closed underneath the consumer
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Exchange, queue or binding declaration failed
    #[error("Topology declaration failed: {0}")]
    TopologyFailed(String),

    /// Consume failed
    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    /// Ack or nack could not be delivered to the broker
    #[error("Acknowledgement failed: {0}")]
    AckFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::ConfigurationError(msg) => AppError::Configuration(msg),
            MessagingError::ConnectionFailed(msg) | MessagingError::ConnectionLost(msg) => {
                AppError::ConnectionLost(msg)
            }
            MessagingError::Timeout(msg) => AppError::Timeout(msg),
            _ => AppError::Messaging(err.to_string()),
        }
    }
}
