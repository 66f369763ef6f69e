//! References to externally persisted data
//!
//! A [`Reference`] points at a blob in object storage without carrying the
//! data itself. References are immutable: a new write always produces a new
//! `Reference`, never mutates an existing one.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ulid::Ulid;

/// Unique workflow instance identifier
///
/// Generated ids use the `verif-{ulid}` form so keys sort by creation time;
/// inbound ids from older stages are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    /// Generate a new workflow id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(format!("verif-{}", Ulid::new()))
    }

    /// Wrap an inbound id
    ///
    /// # Errors
    /// Returns the raw string back if it is empty or contains a path separator
    /// (ids are embedded in storage keys).
    pub fn parse(raw: impl Into<String>) -> Result<Self, String> {
        let raw = raw.into();
        if raw.is_empty() || raw.contains('/') {
            return Err(raw);
        }
        Ok(Self(raw))
    }

    /// Id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pointer to externally persisted data
///
/// # Invariants
/// - Never carries the data itself
/// - Immutable once created; a new write produces a new `Reference`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Logical store (bucket) holding the blob
    pub store: String,
    /// Full object key within the store
    pub key: String,
    /// Size of the persisted bytes
    pub size: u64,
    /// Hex-encoded SHA-256 of the persisted bytes, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Reference {
    /// Create a reference without a content hash
    #[inline]
    #[must_use]
    pub fn new(store: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            store: store.into(),
            key: key.into(),
            size,
            content_hash: None,
        }
    }

    /// Create a reference for freshly written bytes, hashing them
    #[must_use]
    pub fn for_bytes(store: impl Into<String>, key: impl Into<String>, data: &[u8]) -> Self {
        Self {
            store: store.into(),
            key: key.into(),
            size: data.len() as u64,
            content_hash: Some(content_hash(data)),
        }
    }

    /// Attach a content hash
    #[inline]
    #[must_use]
    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} ({} bytes)", self.store, self.key, self.size)
    }
}

/// Hex-encoded SHA-256 of `data`
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
