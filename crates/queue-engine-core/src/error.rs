//! Error types for queue operations.

use crate::message::{MessageId, MessageState};
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: MessageId },

    #[error("Subscriber '{endpoint}' not found for message {message_id}")]
    SubscriberNotFound {
        message_id: MessageId,
        endpoint: String,
    },

    #[error("Message {message_id} is {actual}, expected one of {expected:?}")]
    Conflict {
        message_id: MessageId,
        actual: MessageState,
        expected: Vec<MessageState>,
    },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Batch size {size} exceeds maximum {max_size}")]
    BatchTooLarge { size: usize, max_size: usize },

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

impl QueueError {
    /// Check if error is transient and the operation may succeed against another candidate
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MessageNotFound { .. } => false,
            Self::SubscriberNotFound { .. } => false,
            Self::Conflict { .. } => true,
            Self::MessageTooLarge { .. } => false,
            Self::BatchTooLarge { .. } => false,
            Self::ValidationError(_) => false,
            Self::ConfigurationError(_) => false,
        }
    }

    /// Check if error reports a missing message or subscription
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::MessageNotFound { .. } | Self::SubscriberNotFound { .. }
        )
    }
}

/// Errors raised while delivering a message to a push subscriber
#[derive(Debug, Clone, Error)]
pub enum PushError {
    #[error("Connection to {endpoint} failed: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    #[error("Request to {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("Subscriber {endpoint} rejected delivery with status {status}")]
    Rejected { endpoint: String, status: u16 },

    #[error("Invalid subscriber endpoint: {endpoint}")]
    InvalidEndpoint { endpoint: String },
}

impl PushError {
    /// Check if the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            // Server errors, throttling and request timeouts are retried; other
            // client errors will not change on a second attempt.
            Self::Rejected { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidEndpoint { .. } => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
