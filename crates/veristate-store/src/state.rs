//! Structured-key state persistence
//!
//! [`BlobStateStore`] writes workflow state under the key layout
//! `{date_partition}/{workflow_id}/{category}/{file}` and produces
//! [`Reference`]s for everything it stores.

use crate::blob::{ObjectBlobStore, StorageError};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use veristate_envelope::{Category, Reference, StateEnvelope, WorkflowId};

const JSON_CONTENT_TYPE: &str = "application/json";
const RAW_CONTENT_TYPE: &str = "application/octet-stream";

/// State persistence over an [`ObjectBlobStore`]
///
/// All writes are idempotent overwrites; re-running a stage rewrites the same
/// keys and yields equivalent references.
#[derive(Clone)]
pub struct BlobStateStore {
    blobs: Arc<dyn ObjectBlobStore>,
}

impl BlobStateStore {
    /// Create a state store over the given blob backend
    #[inline]
    #[must_use]
    pub fn new(blobs: Arc<dyn ObjectBlobStore>) -> Self {
        Self { blobs }
    }

    /// The underlying blob store
    #[inline]
    #[must_use]
    pub fn blobs(&self) -> &Arc<dyn ObjectBlobStore> {
        &self.blobs
    }

    /// Build the storage key for a stage file
    ///
    /// Layout: `{YYYY}/{MM}/{DD}/{workflow_id}/{category}/{file}`.
    #[must_use]
    pub fn key_for(workflow: &WorkflowId, category: Category, file: &str) -> String {
        let date = Utc::now().format("%Y/%m/%d");
        format!("{date}/{workflow}/{category}/{file}")
    }

    /// Write raw bytes and return a reference to them
    ///
    /// # Errors
    /// `StorageError::Backend` on write failure.
    pub async fn put_raw(
        &self,
        workflow: &WorkflowId,
        category: Category,
        file: &str,
        payload: Vec<u8>,
    ) -> Result<Reference, StorageError> {
        let key = Self::key_for(workflow, category, file);
        let reference = Reference::for_bytes(self.blobs.store_name(), &key, &payload);
        self.blobs.put(&key, payload, RAW_CONTENT_TYPE).await?;
        tracing::debug!(%reference, "stored raw state blob");
        Ok(reference)
    }

    /// Serialize `payload` as JSON, write it, and return a reference
    ///
    /// # Errors
    /// `StorageError::Serialization` if encoding fails, `Backend` on write failure.
    pub async fn put_json<T: Serialize>(
        &self,
        workflow: &WorkflowId,
        category: Category,
        file: &str,
        payload: &T,
    ) -> Result<Reference, StorageError> {
        let bytes = serde_json::to_vec(payload)?;
        let key = Self::key_for(workflow, category, file);
        let reference = Reference::for_bytes(self.blobs.store_name(), &key, &bytes);
        self.blobs.put(&key, bytes, JSON_CONTENT_TYPE).await?;
        tracing::debug!(%reference, "stored JSON state blob");
        Ok(reference)
    }

    /// Read the bytes a reference points at
    ///
    /// # Errors
    /// `StorageError::NotFound` when the blob is absent.
    pub async fn get(&self, reference: &Reference) -> Result<Vec<u8>, StorageError> {
        self.blobs.get(&reference.key).await
    }

    /// Read and deserialize the JSON a reference points at
    ///
    /// # Errors
    /// `StorageError::NotFound` when absent, `Serialization` on decode failure.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        reference: &Reference,
    ) -> Result<T, StorageError> {
        let bytes = self.blobs.get(&reference.key).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Store a payload and register its reference on the envelope
    ///
    /// The reference is registered under the canonical `{category}_{file}`
    /// name, which is also the name legacy envelopes used on the wire.
    ///
    /// # Errors
    /// Same failure modes as [`BlobStateStore::put_json`].
    pub async fn save_to_envelope<T: Serialize>(
        &self,
        envelope: &mut StateEnvelope,
        category: Category,
        file: &str,
        payload: &T,
    ) -> Result<Reference, StorageError> {
        let reference = self.put_json(&envelope.id, category, file, payload).await?;
        envelope.add_reference(category, file, reference.clone());
        Ok(reference)
    }
}

impl std::fmt::Debug for BlobStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStateStore")
            .field("store", &self.blobs.store_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        value: u32,
    }

    fn state() -> BlobStateStore {
        BlobStateStore::new(Arc::new(MemoryBlobStore::new("state")))
    }

    #[test]
    fn key_layout_is_date_partitioned() {
        let id = WorkflowId::parse("verif-9").unwrap();
        let key = BlobStateStore::key_for(&id, Category::Images, "metadata.json");
        let date = Utc::now().format("%Y/%m/%d").to_string();
        assert_eq!(key, format!("{date}/verif-9/images/metadata.json"));
    }

    #[tokio::test]
    async fn json_roundtrip_through_reference() {
        let store = state();
        let id = WorkflowId::parse("verif-9").unwrap();

        let reference = store
            .put_json(&id, Category::Processing, "initialization.json", &Doc { value: 7 })
            .await
            .unwrap();
        assert_eq!(reference.store, "state");
        assert!(reference.content_hash.is_some());

        let back: Doc = store.get_json(&reference).await.unwrap();
        assert_eq!(back, Doc { value: 7 });
    }

    #[tokio::test]
    async fn get_unknown_reference_is_not_found() {
        let store = state();
        let dangling = Reference::new("state", "2025/01/01/verif-0/images/x.json", 0);
        assert!(matches!(
            store.get(&dangling).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn save_to_envelope_registers_canonical_name() {
        let store = state();
        let mut envelope = StateEnvelope::new(WorkflowId::parse("verif-9").unwrap());

        store
            .save_to_envelope(&mut envelope, Category::Images, "metadata.json", &Doc { value: 1 })
            .await
            .unwrap();

        let reference = envelope.require("images_metadata").unwrap();
        assert!(reference.key.ends_with("/verif-9/images/metadata.json"));
    }

    #[tokio::test]
    async fn rewrite_produces_new_reference_same_key() {
        let store = state();
        let id = WorkflowId::parse("verif-9").unwrap();

        let first = store
            .put_json(&id, Category::Processing, "state.json", &Doc { value: 1 })
            .await
            .unwrap();
        let second = store
            .put_json(&id, Category::Processing, "state.json", &Doc { value: 2 })
            .await
            .unwrap();

        // Idempotent overwrite: same key, distinct reference values
        assert_eq!(first.key, second.key);
        assert_ne!(first.content_hash, second.content_hash);
    }
}
