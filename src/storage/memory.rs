//! In-memory `BlobStore` backed by a `DashMap` of containers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BlobItem, BlobMetadata, BlobStore, StorageError, StorageResult};

#[derive(Debug, Clone, Default)]
struct StoredBlob {
    content: Vec<u8>,
    metadata: BlobMetadata,
    append: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    containers: DashMap<String, BTreeMap<String, StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_container(&self, container: &str) {
        self.containers.entry(container.to_string()).or_default();
    }

    /// Store a blob directly, creating its container (test setup)
    pub fn put(&self, container: &str, name: &str, content: impl Into<Vec<u8>>) {
        self.containers
            .entry(container.to_string())
            .or_default()
            .insert(
                name.to_string(),
                StoredBlob {
                    content: content.into(),
                    ..StoredBlob::default()
                },
            );
    }

    /// Blob content as UTF-8, if present
    pub fn get_string(&self, container: &str, name: &str) -> Option<String> {
        self.containers
            .get(container)?
            .get(name)
            .map(|blob| String::from_utf8_lossy(&blob.content).into_owned())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn container_exists(&self, container: &str) -> StorageResult<bool> {
        Ok(self.containers.contains_key(container))
    }

    async fn read(&self, container: &str, name: &str) -> StorageResult<Vec<u8>> {
        let blobs = self
            .containers
            .get(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        blobs
            .get(name)
            .map(|blob| blob.content.clone())
            .ok_or_else(|| StorageError::blob_not_found(container, name))
    }

    async fn write(&self, container: &str, name: &str, content: Vec<u8>) -> StorageResult<String> {
        let mut blobs = self
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        blobs.insert(
            name.to_string(),
            StoredBlob {
                content,
                ..StoredBlob::default()
            },
        );
        Ok(self.blob_uri(container, name))
    }

    async fn delete(&self, container: &str, name: &str) -> StorageResult<()> {
        let mut blobs = self
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        blobs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::blob_not_found(container, name))
    }

    async fn list(&self, container: &str, prefix: Option<&str>) -> StorageResult<Vec<BlobItem>> {
        let blobs = self
            .containers
            .get(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        Ok(blobs
            .iter()
            .filter(|(name, _)| prefix.map_or(true, |p| name.starts_with(p)))
            .map(|(name, blob)| BlobItem {
                name: name.clone(),
                metadata: blob.metadata.clone(),
            })
            .collect())
    }

    async fn create_append_blob_if_absent(
        &self,
        container: &str,
        name: &str,
    ) -> StorageResult<bool> {
        let mut blobs = self
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        if blobs.contains_key(name) {
            return Ok(false);
        }
        blobs.insert(
            name.to_string(),
            StoredBlob {
                append: true,
                ..StoredBlob::default()
            },
        );
        Ok(true)
    }

    async fn append(&self, container: &str, name: &str, block: &[u8]) -> StorageResult<()> {
        let mut blobs = self
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        let blob = blobs
            .get_mut(name)
            .ok_or_else(|| StorageError::blob_not_found(container, name))?;
        if !blob.append {
            return Err(StorageError::blob_operation(
                container,
                name,
                "append",
                "not an append blob",
            ));
        }
        blob.content.extend_from_slice(block);
        Ok(())
    }

    async fn get_metadata(&self, container: &str, name: &str) -> StorageResult<BlobMetadata> {
        let blobs = self
            .containers
            .get(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        blobs
            .get(name)
            .map(|blob| blob.metadata.clone())
            .ok_or_else(|| StorageError::blob_not_found(container, name))
    }

    async fn set_metadata(
        &self,
        container: &str,
        name: &str,
        metadata: BlobMetadata,
    ) -> StorageResult<()> {
        let mut blobs = self
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::container_not_found(container))?;
        let blob = blobs
            .get_mut(name)
            .ok_or_else(|| StorageError::blob_not_found(container, name))?;
        blob.metadata = metadata;
        Ok(())
    }

    fn blob_uri(&self, container: &str, name: &str) -> String {
        format!("memory://{container}/{name}")
    }
}
