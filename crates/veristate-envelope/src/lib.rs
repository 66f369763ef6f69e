//! State envelope threading for the verification pipeline
//!
//! Pipeline stages are stateless and independently invoked; the envelope is
//! the document handed from one stage to the next. It carries *references*
//! into object storage instead of raw data so the outbound document stays
//! under the platform response ceiling regardless of artifact size.
//!
//! This crate defines:
//! - [`Reference`] - immutable pointer to externally persisted data
//! - [`Category`] - artifact categories used in storage keys and reference names
//! - [`StateEnvelope`] - the per-workflow state document
//! - [`EnvelopeInput`] / [`resolve`] - normalization of the two inbound wire
//!   formats (structured reference map, legacy flat key map) into one shape

pub mod category;
pub mod envelope;
pub mod error;
pub mod reference;
pub mod resolver;

pub use category::Category;
pub use envelope::{StateEnvelope, WorkflowStatus};
pub use error::EnvelopeError;
pub use reference::{Reference, WorkflowId};
pub use resolver::{resolve, EnvelopeInput, LegacyEnvelope, StructuredEnvelope};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
