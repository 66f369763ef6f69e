//! Hybrid inline-vs-external artifact placement
//!
//! Binary artifacts travel to the inference service base64-encoded. Small
//! ones ride inline in the invocation's own response; large ones are
//! persisted through the blob store and referenced. The decision is made per
//! artifact but against a *shared* response budget, because several artifacts
//! in one invocation pile into the same response.
//!
//! Decision order, evaluated strictly in sequence:
//! 1. encoded size over the absolute response ceiling → external
//!    (an artifact this large can never be inlined)
//! 2. tracker reports the aggregate budget would overflow → external
//!    (this artifact alone would fit; together with what is already
//!    committed it does not)
//! 3. encoded size within the per-artifact inline threshold → inline
//! 4. otherwise → external

use crate::blob::{BlobInfo, ObjectBlobStore, StorageError};
use crate::budget::ResponseBudgetTracker;
use crate::media::base64_encoded_len;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ulid::Ulid;
use veristate_envelope::{Reference, WorkflowId};

/// Placement thresholds, derived from the hosting platform's response ceiling
///
/// Both values are explicit configuration, not constants: the right numbers
/// depend on the platform limit and how much structural overhead the
/// surrounding response needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Hard platform limit on a single response; nothing at or above this can
    /// ever be inlined
    pub absolute_ceiling: u64,
    /// Largest encoded artifact eligible for inline placement on its own
    pub per_artifact_inline_max: u64,
}

/// Where an artifact's encoded payload lives
///
/// The sum type makes the exactly-one invariant structural: a placement is
/// inline data or an external reference, never both, never neither.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storageMethod", rename_all = "camelCase")]
pub enum Placement {
    /// Encoded payload embedded in the response
    #[serde(rename_all = "camelCase")]
    Inline {
        /// Base64 payload
        inline_data: String,
    },
    /// Payload persisted in object storage
    #[serde(rename_all = "camelCase")]
    External {
        /// Pointer to the persisted encoded payload
        external_ref: Reference,
    },
}

impl Placement {
    /// Whether the payload is embedded inline
    #[inline]
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self, Placement::Inline { .. })
    }
}

/// Descriptive inputs for an artifact being stored
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    /// Slot name within the invocation (e.g. `reference`, `checking`);
    /// doubles as the budget slot
    pub name: String,
    /// Declared content type of the raw bytes
    pub content_type: String,
    /// Where the raw bytes came from
    pub source_location: String,
    /// Last modification time at the source, when known
    pub last_modified: Option<DateTime<Utc>>,
}

impl ArtifactSource {
    /// Create a source descriptor
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        source_location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            source_location: source_location.into(),
            last_modified: None,
        }
    }

    /// Attach the source's last-modified time
    #[inline]
    #[must_use]
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }
}

/// Metadata describing a stored image artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageArtifactMetadata {
    /// Slot name within the invocation
    pub name: String,
    /// Declared content type of the raw bytes
    pub content_type: String,
    /// Raw (pre-encoding) size
    pub size_bytes: u64,
    /// Encoded size, which is what counts against the response budget
    pub encoded_size: u64,
    /// Last modification time at the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Where the raw bytes came from
    pub source_location: String,
    /// Inline data or external reference
    #[serde(flatten)]
    pub storage: Placement,
}

/// Errors from hybrid artifact operations
#[derive(Debug, thiserror::Error)]
pub enum HybridStoreError {
    /// Blob store failure on the external path
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Encoded payload failed to decode on retrieval
    #[error("artifact {name} has corrupt encoded data: {message}")]
    CorruptEncoding {
        /// Artifact slot name
        name: String,
        /// Decoder message
        message: String,
    },

    /// Externalize called on an artifact that is already external
    #[error("artifact {0} is not stored inline")]
    NotInline(String),
}

/// Outcome of a pre-download budget reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEstimate {
    /// Source object metadata from the `head` read
    pub info: BlobInfo,
    /// Estimated encoded size, computed from the raw size
    pub estimated_encoded_size: u64,
    /// Whether the estimate was committed to the inline budget
    pub reserved_inline: bool,
}

/// Why an artifact went external; recorded in logs for operability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExternalReason {
    SingleTooLarge,
    AggregateBudget,
    PerArtifactThreshold,
}

/// Inline-vs-external artifact store for one invocation
///
/// Shares one [`ResponseBudgetTracker`] across all artifacts stored during
/// the invocation; the tracker is what protects the aggregate budget.
pub struct HybridArtifactStore {
    blobs: Arc<dyn ObjectBlobStore>,
    tracker: Arc<ResponseBudgetTracker>,
    config: PlacementConfig,
    workflow: WorkflowId,
}

impl HybridArtifactStore {
    /// Create a store for one invocation
    #[must_use]
    pub fn new(
        blobs: Arc<dyn ObjectBlobStore>,
        tracker: Arc<ResponseBudgetTracker>,
        config: PlacementConfig,
        workflow: WorkflowId,
    ) -> Self {
        Self {
            blobs,
            tracker,
            config,
            workflow,
        }
    }

    /// The shared budget tracker
    #[inline]
    #[must_use]
    pub fn tracker(&self) -> &Arc<ResponseBudgetTracker> {
        &self.tracker
    }

    /// Reserve budget for an artifact before downloading it
    ///
    /// Reads the source object's metadata and, when the estimated encoded
    /// size would qualify for inline placement, commits the estimate to this
    /// artifact's budget slot. Concurrent downloads therefore see each
    /// other's in-flight claims instead of all deciding against an empty
    /// budget. [`HybridArtifactStore::store`] later replaces the estimate
    /// with the exact encoded size through the same slot, or releases it if
    /// the artifact ends up external.
    ///
    /// # Errors
    /// `HybridStoreError::Storage` with `NotFound` when the source object
    /// is absent.
    pub async fn reserve(
        &self,
        source_blobs: &dyn ObjectBlobStore,
        key: &str,
        name: &str,
    ) -> Result<ArtifactEstimate, HybridStoreError> {
        let info = source_blobs.head(key).await?;
        let estimated = base64_encoded_len(info.size);

        let reserved_inline = estimated <= self.config.per_artifact_inline_max
            && estimated <= self.config.absolute_ceiling
            && self.tracker.try_update(name, estimated);
        tracing::debug!(
            artifact = %name,
            raw_size = info.size,
            estimated,
            reserved_inline,
            budget_total = self.tracker.total(),
            "reserved artifact budget from metadata"
        );

        Ok(ArtifactEstimate {
            info,
            estimated_encoded_size: estimated,
            reserved_inline,
        })
    }

    /// Encode and place an artifact
    ///
    /// Replaces any estimate previously committed for this artifact through
    /// [`HybridArtifactStore::reserve`] with the exact encoded size.
    ///
    /// # Errors
    /// `HybridStoreError::Storage` if the external write fails.
    pub async fn store(
        &self,
        source: &ArtifactSource,
        raw: &[u8],
    ) -> Result<ImageArtifactMetadata, HybridStoreError> {
        let encoded = BASE64.encode(raw);
        let encoded_size = encoded.len() as u64;

        let external_reason = if encoded_size > self.config.absolute_ceiling {
            Some(ExternalReason::SingleTooLarge)
        } else if self.tracker.would_exceed_for(&source.name, encoded_size) {
            Some(ExternalReason::AggregateBudget)
        } else if encoded_size <= self.config.per_artifact_inline_max {
            // Commit atomically; a concurrent artifact may have claimed the
            // remaining budget between the check above and here.
            if self.tracker.try_update(&source.name, encoded_size) {
                None
            } else {
                Some(ExternalReason::AggregateBudget)
            }
        } else {
            Some(ExternalReason::PerArtifactThreshold)
        };

        let storage = match external_reason {
            None => {
                tracing::debug!(
                    artifact = %source.name,
                    encoded_size,
                    budget_total = self.tracker.total(),
                    "placed artifact inline"
                );
                Placement::Inline { inline_data: encoded }
            }
            Some(reason) => {
                // Drop any estimate reserved for this slot pre-download
                self.tracker.release(&source.name);
                let reference = self.persist_external(source, encoded).await?;
                tracing::info!(
                    artifact = %source.name,
                    encoded_size,
                    ?reason,
                    key = %reference.key,
                    "placed artifact externally"
                );
                Placement::External { external_ref: reference }
            }
        };

        Ok(ImageArtifactMetadata {
            name: source.name.clone(),
            content_type: source.content_type.clone(),
            size_bytes: raw.len() as u64,
            encoded_size,
            last_modified: source.last_modified,
            source_location: source.source_location.clone(),
            storage,
        })
    }

    /// Fetch and decode an artifact's raw bytes, regardless of placement
    ///
    /// # Errors
    /// `NotFound`/`Backend` through `Storage` on the external path;
    /// `CorruptEncoding` if the payload fails to decode.
    pub async fn retrieve(
        &self,
        metadata: &ImageArtifactMetadata,
    ) -> Result<Vec<u8>, HybridStoreError> {
        let encoded = match &metadata.storage {
            Placement::Inline { inline_data } => inline_data.clone(),
            Placement::External { external_ref } => {
                let bytes = self.blobs.get(&external_ref.key).await?;
                String::from_utf8(bytes).map_err(|e| HybridStoreError::CorruptEncoding {
                    name: metadata.name.clone(),
                    message: e.to_string(),
                })?
            }
        };
        BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| HybridStoreError::CorruptEncoding {
                name: metadata.name.clone(),
                message: e.to_string(),
            })
    }

    /// Move an inline artifact to external storage and release its budget
    ///
    /// Used when a later artifact needs the budget this one is occupying.
    ///
    /// # Errors
    /// `HybridStoreError::NotInline` if the artifact is already external;
    /// `Storage` if the external write fails.
    pub async fn externalize(
        &self,
        metadata: &mut ImageArtifactMetadata,
    ) -> Result<(), HybridStoreError> {
        let Placement::Inline { inline_data } = &metadata.storage else {
            return Err(HybridStoreError::NotInline(metadata.name.clone()));
        };

        let source = ArtifactSource::new(
            metadata.name.clone(),
            metadata.content_type.clone(),
            metadata.source_location.clone(),
        );
        let reference = self.persist_external(&source, inline_data.clone()).await?;
        metadata.storage = Placement::External { external_ref: reference };
        self.tracker.release(&metadata.name);
        tracing::info!(artifact = %metadata.name, "externalized inline artifact");
        Ok(())
    }

    /// Write encoded data under a collision-resistant key
    ///
    /// Concurrent invocations may write at the same instant, so the key
    /// carries a ULID suffix in addition to the time partition.
    async fn persist_external(
        &self,
        source: &ArtifactSource,
        encoded: String,
    ) -> Result<Reference, HybridStoreError> {
        let date = Utc::now().format("%Y/%m/%d");
        let key = format!(
            "{date}/{}/images/{}-{}.b64",
            self.workflow,
            source.name,
            Ulid::new()
        );
        let bytes = encoded.into_bytes();
        let reference = Reference::for_bytes(self.blobs.store_name(), &key, &bytes);
        self.blobs.put(&key, bytes, "text/plain").await?;
        Ok(reference)
    }
}

impl std::fmt::Debug for HybridArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridArtifactStore")
            .field("store", &self.blobs.store_name())
            .field("workflow", &self.workflow)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
