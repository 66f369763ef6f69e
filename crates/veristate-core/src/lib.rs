//! Stage host for the image-verification pipeline
//!
//! Ties the other crates together into the per-invocation control flow:
//! - [`config`] - stage configuration with environment overrides
//! - [`error`] - the workflow error taxonomy and its wire form
//! - [`document`] - the outbound document handed to the next stage
//! - [`inference`] - the model endpoint seam
//! - [`stage`] - the [`Stage`] trait and the [`StageHost`] that runs it
//!
//! A stage binary implements [`Stage`], builds a [`StageHost`] over its
//! store and inference backends, and calls [`StageHost::execute`] per
//! inbound document.

pub mod config;
pub mod document;
pub mod error;
pub mod inference;
pub mod stage;

pub use config::StageConfig;
pub use document::OutboundDocument;
pub use error::{ErrorInfo, WorkflowError};
pub use inference::{
    ArtifactPayload, InferenceClient, InferenceError, InferenceRequest, InferenceResponse,
};
pub use stage::{Stage, StageContext, StageHost};

/// Convenience re-exports for stage binaries
pub mod prelude {
    pub use crate::{
        ArtifactPayload, ErrorInfo, InferenceClient, InferenceError, InferenceRequest,
        InferenceResponse, OutboundDocument, Stage, StageConfig, StageContext, StageHost,
        WorkflowError,
    };
    pub use tokio_util::sync::CancellationToken;
    pub use veristate_envelope::{
        resolve, Category, EnvelopeInput, Reference, StateEnvelope, WorkflowId, WorkflowStatus,
    };
    pub use veristate_runtime::{
        FetchDescriptor, FetchError, ParallelFetchCoordinator, Requiredness, RetryExecutor,
        RetryPolicy,
    };
    pub use veristate_store::{
        ArtifactSource, BlobStateStore, DocumentStore, HybridArtifactStore, ImageArtifactMetadata,
        MemoryBlobStore, MemoryDocumentStore, ObjectBlobStore, Placement, ResponseBudgetTracker,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
