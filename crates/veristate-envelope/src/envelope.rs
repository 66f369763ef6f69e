//! The state envelope carried between pipeline stages

use crate::category::Category;
use crate::error::EnvelopeError;
use crate::reference::{Reference, WorkflowId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Workflow status threaded through the envelope
///
/// Terminal failure values are distinguishable so downstream orchestration can
/// branch without inspecting error internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    /// Workflow record created, no stage work done yet
    #[serde(rename = "VERIFICATION_INITIALIZED")]
    Initialized,
    /// Source images fetched and placed (inline or external)
    #[serde(rename = "IMAGES_FETCHED")]
    ImagesFetched,
    /// Prompt artifacts prepared for the inference call
    #[serde(rename = "PROMPT_PREPARED")]
    PromptPrepared,
    /// Inference response received and persisted
    #[serde(rename = "INFERENCE_COMPLETED")]
    InferenceCompleted,
    /// Workflow finished successfully
    #[serde(rename = "COMPLETED")]
    Completed,
    /// Terminal failure; the outbound document carries an error object
    #[serde(rename = "VERIFICATION_FAILED")]
    Failed,
}

impl WorkflowStatus {
    /// Whether this status ends the workflow
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Whether this is the terminal failure value
    #[inline]
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(self, WorkflowStatus::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Initialized => "VERIFICATION_INITIALIZED",
            WorkflowStatus::ImagesFetched => "IMAGES_FETCHED",
            WorkflowStatus::PromptPrepared => "PROMPT_PREPARED",
            WorkflowStatus::InferenceCompleted => "INFERENCE_COMPLETED",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "VERIFICATION_FAILED",
        };
        f.write_str(s)
    }
}

/// State document owned by the currently executing stage
///
/// Ownership transfers to the next stage only via the serialized outbound
/// document; there is no shared mutable envelope across stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEnvelope {
    /// Globally unique workflow instance id
    pub id: WorkflowId,
    /// Current workflow status
    pub status: WorkflowStatus,
    /// Creation time of the workflow instance
    pub created_at: DateTime<Utc>,
    /// Canonical name → reference map
    pub references: IndexMap<String, Reference>,
    /// Free-form summary fields surfaced to orchestration
    #[serde(default)]
    pub summary: serde_json::Map<String, serde_json::Value>,
}

impl StateEnvelope {
    /// Create a fresh envelope for a new workflow instance
    #[must_use]
    pub fn new(id: WorkflowId) -> Self {
        Self {
            id,
            status: WorkflowStatus::Initialized,
            created_at: Utc::now(),
            references: IndexMap::new(),
            summary: serde_json::Map::new(),
        }
    }

    /// Register a reference under its canonical `{category}_{file}` name
    ///
    /// Overwrites any previous reference with the same name; the old
    /// `Reference` value itself is unchanged (references are immutable).
    pub fn add_reference(&mut self, category: Category, file: &str, reference: Reference) {
        self.references.insert(category.reference_name(file), reference);
    }

    /// Look up a reference by canonical name
    #[inline]
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<&Reference> {
        self.references.get(name)
    }

    /// Look up a reference that must be present
    ///
    /// # Errors
    /// `EnvelopeError::MissingReferences` naming the absent reference.
    pub fn require(&self, name: &str) -> Result<&Reference, EnvelopeError> {
        self.references
            .get(name)
            .ok_or_else(|| EnvelopeError::MissingReferences(vec![name.to_string()]))
    }

    /// Set a summary field
    pub fn set_summary(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.summary.insert(key.into(), value);
    }

    /// Advance the workflow status
    #[inline]
    pub fn set_status(&mut self, status: WorkflowStatus) {
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn envelope() -> StateEnvelope {
        StateEnvelope::new(WorkflowId::parse("verif-test").unwrap())
    }

    #[test]
    fn add_and_require_reference() {
        let mut env = envelope();
        env.add_reference(
            Category::Images,
            "metadata.json",
            Reference::new("state", "2025/08/29/verif-test/images/metadata.json", 10),
        );

        assert!(env.reference("images_metadata").is_some());
        assert!(env.require("images_metadata").is_ok());

        let err = env.require("prompts_system").unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingReferences(ref names) if names == &["prompts_system"]));
    }

    #[test]
    fn status_terminal_classification() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Failed.is_failure());
        assert!(!WorkflowStatus::ImagesFetched.is_terminal());
    }

    #[test]
    fn status_wire_strings() {
        let s = serde_json::to_value(WorkflowStatus::Failed).unwrap();
        assert_eq!(s, "VERIFICATION_FAILED");
        let s: WorkflowStatus = serde_json::from_value(serde_json::json!("IMAGES_FETCHED")).unwrap();
        assert_eq!(s, WorkflowStatus::ImagesFetched);
    }

    #[test]
    fn envelope_serializes_references_by_name() {
        let mut env = envelope();
        env.add_reference(Category::Prompts, "system.json", Reference::new("state", "k", 1));
        env.set_summary("verificationType", serde_json::json!("LAYOUT_VS_CHECKING"));

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["id"], "verif-test");
        assert!(json["references"]["prompts_system"].is_object());
        assert_eq!(json["summary"]["verificationType"], "LAYOUT_VS_CHECKING");
    }
}
