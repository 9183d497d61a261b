//! # Blob Storage
//!
//! Key/value object storage addressed by `(container, name)`. Holds
//! ground-truth files, stage artifacts and the per-run job status logs.
//! Status logs use append blobs with string metadata.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryBlobStore;

/// Blob metadata is a flat string map
pub type BlobMetadata = HashMap<String, String>;

/// Blob storage error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Container not found: {container}")]
    ContainerNotFound { container: String },

    #[error("Blob not found: {container}/{name}")]
    BlobNotFound { container: String, name: String },

    #[error("Blob operation failed: {container}/{name}: {operation}: {message}")]
    BlobOperation {
        container: String,
        name: String,
        operation: String,
        message: String,
    },

    #[error("Blob {container}/{name} has invalid content: {message}")]
    InvalidContent {
        container: String,
        name: String,
        message: String,
    },
}

impl StorageError {
    pub fn container_not_found(container: impl Into<String>) -> Self {
        Self::ContainerNotFound {
            container: container.into(),
        }
    }

    pub fn blob_not_found(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self::BlobNotFound {
            container: container.into(),
            name: name.into(),
        }
    }

    pub fn blob_operation(
        container: impl Into<String>,
        name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BlobOperation {
            container: container.into(),
            name: name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_content(
        container: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidContent {
            container: container.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A listed blob with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: String,
    pub metadata: BlobMetadata,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn container_exists(&self, container: &str) -> StorageResult<bool>;

    async fn read(&self, container: &str, name: &str) -> StorageResult<Vec<u8>>;

    /// Write (or overwrite) a block blob, returning its URI
    async fn write(&self, container: &str, name: &str, content: Vec<u8>) -> StorageResult<String>;

    async fn delete(&self, container: &str, name: &str) -> StorageResult<()>;

    /// List blobs whose names start with `prefix`, metadata included
    async fn list(&self, container: &str, prefix: Option<&str>) -> StorageResult<Vec<BlobItem>>;

    /// Create an empty append blob; returns `false` if it already existed
    async fn create_append_blob_if_absent(&self, container: &str, name: &str)
        -> StorageResult<bool>;

    async fn append(&self, container: &str, name: &str, block: &[u8]) -> StorageResult<()>;

    async fn get_metadata(&self, container: &str, name: &str) -> StorageResult<BlobMetadata>;

    /// Replace the metadata of an existing blob
    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: BlobMetadata,
    ) -> StorageResult<()>;

    fn blob_uri(&self, container: &str, name: &str) -> String;
}
