//! Storage layer for the verification pipeline
//!
//! Provides the seams the stateless stages persist through:
//! - [`ObjectBlobStore`] - thin key/value blob read/write over object storage
//! - [`BlobStateStore`] - structured-key state persistence built on it
//! - [`DocumentStore`] - one queryable record per workflow, with the single
//!   conditional create-if-absent write that gives at-most-once initialization
//! - [`ResponseBudgetTracker`] - shared inline-byte budget within one invocation
//! - [`HybridArtifactStore`] - per-artifact inline-vs-external placement
//! - [`media`] - image sniffing and encoded-size estimation helpers

pub mod blob;
pub mod budget;
pub mod document;
pub mod hybrid;
pub mod media;
pub mod state;

pub use blob::{BlobInfo, MemoryBlobStore, ObjectBlobStore, StorageError};
pub use budget::ResponseBudgetTracker;
pub use document::{DocumentStore, DocumentStoreError, MemoryDocumentStore, WorkflowRecord};
pub use hybrid::{
    ArtifactEstimate, ArtifactSource, HybridArtifactStore, HybridStoreError,
    ImageArtifactMetadata, Placement, PlacementConfig,
};
pub use media::{base64_encoded_len, ImageFormat};
pub use state::BlobStateStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
