//! Document store seam
//!
//! One record per workflow id, holding only a pointer back into object
//! storage plus a handful of queryable summary fields and a TTL for automatic
//! expiry. The conditional create-if-absent write here is the pipeline's sole
//! cross-invocation coordination mechanism: it gives at-most-once workflow
//! initialization under concurrent duplicate triggers, without any
//! distributed lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use veristate_envelope::{Reference, WorkflowId, WorkflowStatus};

/// Queryable workflow record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRecord {
    /// Workflow instance id (primary key)
    pub workflow_id: WorkflowId,
    /// Pointer to the persisted envelope in object storage
    pub envelope_ref: Reference,
    /// Current status, queryable by orchestration
    pub status: WorkflowStatus,
    /// Verification type summary field (e.g. layout-vs-checking)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_type: Option<String>,
    /// Record creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
    /// Automatic expiry time
    pub expires_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Create a fresh record expiring `ttl` from now
    #[must_use]
    pub fn new(workflow_id: WorkflowId, envelope_ref: Reference, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            workflow_id,
            envelope_ref,
            status: WorkflowStatus::Initialized,
            verification_type: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Set the verification type summary field
    #[inline]
    #[must_use]
    pub fn with_verification_type(mut self, vt: impl Into<String>) -> Self {
        self.verification_type = Some(vt.into());
        self
    }
}

/// Errors from document store operations
#[derive(Debug, thiserror::Error)]
pub enum DocumentStoreError {
    /// The conditional create lost: a record for this id already exists
    #[error("workflow record already exists: {0}")]
    AlreadyExists(WorkflowId),

    /// No record for the requested id
    #[error("workflow record not found: {0}")]
    NotFound(WorkflowId),

    /// Backend failure
    #[error("document store failure: {0}")]
    Backend(String),
}

/// Document store contract consumed by the pipeline
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `record`, failing if a record with the same id exists
    ///
    /// This is the single conditional write in the system; every other write
    /// is an idempotent overwrite.
    ///
    /// # Errors
    /// `DocumentStoreError::AlreadyExists` when the record lost the race.
    async fn put_if_absent(&self, record: WorkflowRecord) -> Result<(), DocumentStoreError>;

    /// Fetch the record for a workflow id
    ///
    /// # Errors
    /// `DocumentStoreError::NotFound` when absent.
    async fn get(&self, id: &WorkflowId) -> Result<WorkflowRecord, DocumentStoreError>;

    /// Overwrite status and envelope pointer for an existing record
    ///
    /// # Errors
    /// `DocumentStoreError::NotFound` when the record does not exist.
    async fn update(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        envelope_ref: Reference,
    ) -> Result<(), DocumentStoreError>;
}

/// In-memory [`DocumentStore`] for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    records: DashMap<WorkflowId, WorkflowRecord>,
}

impl MemoryDocumentStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put_if_absent(&self, record: WorkflowRecord) -> Result<(), DocumentStoreError> {
        // DashMap entry gives the same atomicity a conditional put provides
        match self.records.entry(record.workflow_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DocumentStoreError::AlreadyExists(record.workflow_id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &WorkflowId) -> Result<WorkflowRecord, DocumentStoreError> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| DocumentStoreError::NotFound(id.clone()))
    }

    async fn update(
        &self,
        id: &WorkflowId,
        status: WorkflowStatus,
        envelope_ref: Reference,
    ) -> Result<(), DocumentStoreError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| DocumentStoreError::NotFound(id.clone()))?;
        record.status = status;
        record.envelope_ref = envelope_ref;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(id: &str) -> WorkflowRecord {
        WorkflowRecord::new(
            WorkflowId::parse(id).unwrap(),
            Reference::new("state", "k", 1),
            Duration::days(30),
        )
    }

    #[tokio::test]
    async fn put_if_absent_then_get() {
        let store = MemoryDocumentStore::new();
        store.put_if_absent(record("verif-1")).await.unwrap();

        let got = store.get(&WorkflowId::parse("verif-1").unwrap()).await.unwrap();
        assert_eq!(got.status, WorkflowStatus::Initialized);
        assert!(got.expires_at > got.created_at);
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let store = MemoryDocumentStore::new();
        store.put_if_absent(record("verif-1")).await.unwrap();

        let err = store.put_if_absent(record("verif-1")).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn concurrent_duplicate_creates_have_one_winner() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put_if_absent(record("verif-race")).await
            }));
        }

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => winners += 1,
                Err(DocumentStoreError::AlreadyExists(_)) => losers += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(losers, 7);
    }

    #[tokio::test]
    async fn update_overwrites_status_and_pointer() {
        let store = MemoryDocumentStore::new();
        let id = WorkflowId::parse("verif-1").unwrap();
        store.put_if_absent(record("verif-1")).await.unwrap();

        let new_ref = Reference::new("state", "k2", 2);
        store
            .update(&id, WorkflowStatus::ImagesFetched, new_ref.clone())
            .await
            .unwrap();

        let got = store.get(&id).await.unwrap();
        assert_eq!(got.status, WorkflowStatus::ImagesFetched);
        assert_eq!(got.envelope_ref, new_ref);
    }

    #[tokio::test]
    async fn update_missing_record_is_not_found() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update(
                &WorkflowId::parse("verif-x").unwrap(),
                WorkflowStatus::Completed,
                Reference::new("state", "k", 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::NotFound(_)));
    }
}
