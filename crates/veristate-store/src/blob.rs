//! Object blob storage seam
//!
//! The pipeline consumes object storage, it does not implement it. The
//! [`ObjectBlobStore`] trait is the narrow contract the rest of the crate is
//! written against; [`MemoryBlobStore`] backs tests and local runs.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Blob metadata returned by [`ObjectBlobStore::head`]
///
/// Supports metadata pre-reads (size estimation) without downloading the blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Size of the stored bytes
    pub size: u64,
    /// Declared content type
    pub content_type: String,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

/// Errors from blob storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Blob absent under the requested key
    #[error("blob not found: {key}")]
    NotFound {
        /// The absent key
        key: String,
    },

    /// Read/write failure reported by the backing store
    #[error("storage backend failure on {key}: {message}")]
    Backend {
        /// Key the operation targeted
        key: String,
        /// Backend-reported message
        message: String,
    },

    /// Payload could not be serialized/deserialized
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Transient failures are worth retrying; absence and bad payloads are not
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Backend { .. })
    }
}

/// Thin key/value blob read/write over external object storage
///
/// Writes are idempotent overwrites. Conditional-create semantics live at the
/// document store, not here.
#[async_trait::async_trait]
pub trait ObjectBlobStore: Send + Sync {
    /// Logical store (bucket) name, recorded in references
    fn store_name(&self) -> &str;

    /// Write `data` under `key`, overwriting any existing blob
    ///
    /// # Errors
    /// `StorageError::Backend` on write failure.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Read the blob under `key`
    ///
    /// # Errors
    /// `StorageError::NotFound` when absent, `StorageError::Backend` otherwise.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Read blob metadata without the payload
    ///
    /// # Errors
    /// `StorageError::NotFound` when absent.
    async fn head(&self, key: &str) -> Result<BlobInfo, StorageError>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
}

/// In-memory [`ObjectBlobStore`] for tests and local runs
#[derive(Debug)]
pub struct MemoryBlobStore {
    name: String,
    objects: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    /// Create an empty store with the given logical name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: DashMap::new(),
        }
    }

    /// Number of stored blobs
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no blobs
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait::async_trait]
impl ObjectBlobStore for MemoryBlobStore {
    fn store_name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.objects.insert(
            key.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(key)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn head(&self, key: &str) -> Result<BlobInfo, StorageError> {
        self.objects
            .get(key)
            .map(|blob| BlobInfo {
                size: blob.data.len() as u64,
                content_type: blob.content_type.clone(),
                last_modified: blob.last_modified,
            })
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = MemoryBlobStore::new("state");
        store.put("a/b", b"bytes".to_vec(), "application/octet-stream").await.unwrap();
        assert_eq!(store.get("a/b").await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryBlobStore::new("state");
        let err = store.get("absent").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { ref key } if key == "absent"));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store = MemoryBlobStore::new("state");
        store.put("k", b"one".to_vec(), "text/plain").await.unwrap();
        store.put("k", b"two".to_vec(), "text/plain").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"two");
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn head_reports_size_without_payload() {
        let store = MemoryBlobStore::new("state");
        store.put("img", vec![0u8; 1024], "image/png").await.unwrap();
        let info = store.head("img").await.unwrap();
        assert_eq!(info.size, 1024);
        assert_eq!(info.content_type, "image/png");
    }
}
