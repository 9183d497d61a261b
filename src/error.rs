//! # Pipeline Error Types
//!
//! Crate-level error wrapping the per-layer errors plus the stage outcomes
//! the processors need to tell apart. `Deadletter` is a tagged variant
//! carrying the original message so the stage loop can quarantine it
//! verbatim.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::{MessagingError, QueueMessage};
use crate::storage::StorageError;
use crate::transform::TransformError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid blob reference '{uri}': expected container/blob-name")]
    InvalidBlobRef { uri: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Endpoint call to {url} failed: {message}")]
    Endpoint { url: String, message: String },

    #[error("Endpoint returned status {status} for call {call_id}: {body}")]
    HttpStatus {
        status: u16,
        call_id: String,
        body: String,
    },

    #[error("Endpoint returned status {status} with an empty body for call {call_id}")]
    EmptyResponse { status: u16, call_id: String },

    #[error("Results catalog returned status {status}: {body}")]
    Catalog { status: u16, body: String },

    #[error("Message {} must be dead-lettered: {reason}", .message.id)]
    Deadletter {
        reason: String,
        message: Box<QueueMessage>,
        body: String,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Task panicked: {0}")]
    TaskPanicked(String),
}

impl PipelineError {
    /// Tag a message for quarantine, keeping its undecoded body
    pub fn deadletter(reason: impl Into<String>, message: &QueueMessage) -> Self {
        Self::Deadletter {
            reason: reason.into(),
            body: message.body.clone(),
            message: Box::new(message.clone()),
        }
    }

    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    pub fn endpoint(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Endpoint {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn is_deadletter(&self) -> bool {
        matches!(self, Self::Deadletter { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
