//! Outbound stage document
//!
//! The serialized hand-off between stages. References and summary fields
//! ride the wire; bulk data stays behind its references. A failed invocation
//! still emits a well-formed document so orchestration can branch on status
//! and error code instead of parsing exception text.

use crate::error::{ErrorInfo, WorkflowError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use veristate_envelope::{Reference, StateEnvelope, WorkflowStatus};

/// Current outbound document schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Document handed to the next stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundDocument {
    /// Wire schema version
    pub schema_version: u32,
    /// Workflow instance id, verbatim from the inbound document on failure
    pub workflow_id: String,
    /// Status after this stage
    pub status: WorkflowStatus,
    /// Canonical name → reference map
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub references: IndexMap<String, Reference>,
    /// Summary fields surfaced to orchestration
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub summary: serde_json::Map<String, serde_json::Value>,
    /// Present exactly when `status` is the terminal failure value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl OutboundDocument {
    /// Wrap a completed stage's envelope
    #[must_use]
    pub fn from_envelope(envelope: &StateEnvelope) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            workflow_id: envelope.id.to_string(),
            status: envelope.status,
            references: envelope.references.clone(),
            summary: envelope.summary.clone(),
            error: None,
        }
    }

    /// Build the terminal failure document
    ///
    /// `workflow_id` is whatever arrived inbound, unvalidated: a failure
    /// report must name the workflow even when the id itself was the problem.
    #[must_use]
    pub fn failure(workflow_id: &str, error: &WorkflowError) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            workflow_id: workflow_id.to_owned(),
            status: WorkflowStatus::Failed,
            references: IndexMap::new(),
            summary: serde_json::Map::new(),
            error: Some(ErrorInfo::from_error(error)),
        }
    }
}
