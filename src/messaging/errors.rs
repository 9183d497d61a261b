//! # Messaging Error Types
//!
//! Structured errors for queue operations using thiserror instead of
//! `Box<dyn Error>` patterns.

use thiserror::Error;

/// Queue client error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message {message_id} not found in queue {queue_name}")]
    MessageNotFound {
        queue_name: String,
        message_id: String,
    },

    #[error("Pop receipt for message {message_id} in queue {queue_name} is stale")]
    PopReceiptMismatch {
        queue_name: String,
        message_id: String,
    },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Invalid queue name: {queue_name}: {reason}")]
    InvalidQueueName { queue_name: String, reason: String },
}

impl MessagingError {
    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Create a message not found error
    pub fn message_not_found(queue_name: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::MessageNotFound {
            queue_name: queue_name.into(),
            message_id: message_id.into(),
        }
    }

    /// Create a stale pop receipt error
    pub fn pop_receipt_mismatch(
        queue_name: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self::PopReceiptMismatch {
            queue_name: queue_name.into(),
            message_id: message_id.into(),
        }
    }

    /// Create a queue operation error
    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid queue name error
    pub fn invalid_queue_name(queue_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQueueName {
            queue_name: queue_name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
