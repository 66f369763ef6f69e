//! Inbound envelope normalization
//!
//! Two wire formats arrive at a stage boundary: the current structured form
//! with an explicit `references` map, and a legacy flat map whose keys follow
//! the `{category}_{file}` convention of an older format. Upstream and
//! downstream stages may run at different format versions, so unmappable
//! legacy keys are skipped with a diagnostic rather than failing resolution.
//! Business logic never branches on raw key presence; it sees only the
//! canonical [`StateEnvelope`].

use crate::category::Category;
use crate::envelope::{StateEnvelope, WorkflowStatus};
use crate::error::EnvelopeError;
use crate::reference::{Reference, WorkflowId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;

/// Structured inbound envelope (current wire format)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredEnvelope {
    /// Workflow instance id
    #[serde(alias = "verificationId")]
    pub workflow_id: String,
    /// Canonical name → reference map
    pub references: IndexMap<String, Reference>,
    /// Status as reported by the upstream stage
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    /// Creation time, if the upstream stage forwarded it
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Summary fields forwarded from upstream
    #[serde(default)]
    pub summary: serde_json::Map<String, serde_json::Value>,
}

/// Legacy inbound envelope: a flat map of ad hoc keys
///
/// Reference-valued entries use `{category}_{file}` names; other direct
/// fields are tolerated for backward compatibility and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyEnvelope {
    /// Workflow instance id
    #[serde(rename = "verificationId", alias = "workflowId")]
    pub workflow_id: String,
    /// Status string as reported by the upstream stage
    #[serde(default)]
    pub status: Option<WorkflowStatus>,
    /// Everything else in the document
    #[serde(flatten)]
    pub entries: IndexMap<String, serde_json::Value>,
}

/// Inbound envelope document, one of the two wire formats
///
/// Modeled as a tagged union with a single normalization function
/// ([`resolve`]) producing the canonical type.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeInput {
    /// Current structured form
    Structured(StructuredEnvelope),
    /// Legacy flat key map
    Legacy(LegacyEnvelope),
}

impl EnvelopeInput {
    /// Parse an inbound document, trying both wire formats
    ///
    /// # Errors
    /// `EnvelopeError::Malformed` when the value matches neither format.
    pub fn from_json(value: serde_json::Value) -> Result<Self, EnvelopeError> {
        serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    /// Raw workflow id as it arrived, before validation
    ///
    /// Lets failure reporting name the workflow even when resolution fails.
    #[inline]
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::Structured(doc) => &doc.workflow_id,
            Self::Legacy(doc) => &doc.workflow_id,
        }
    }
}

/// Normalize an inbound envelope into the canonical [`StateEnvelope`]
///
/// `required` lists the canonical reference names this stage cannot run
/// without. Resolution fails only if one of them remains unmapped after
/// the format-specific mapping has been applied.
///
/// # Errors
/// - `EnvelopeError::InvalidWorkflowId` for an empty/malformed id
/// - `EnvelopeError::MissingReferences` naming every absent required reference
pub fn resolve(input: EnvelopeInput, required: &[&str]) -> Result<StateEnvelope, EnvelopeError> {
    let envelope = match input {
        EnvelopeInput::Structured(doc) => from_structured(doc)?,
        EnvelopeInput::Legacy(doc) => from_legacy(doc)?,
    };

    let missing: Vec<String> = required
        .iter()
        .filter(|name| !envelope.references.contains_key(**name))
        .map(|name| (*name).to_string())
        .collect();

    if missing.is_empty() {
        Ok(envelope)
    } else {
        Err(EnvelopeError::MissingReferences(missing))
    }
}

fn from_structured(doc: StructuredEnvelope) -> Result<StateEnvelope, EnvelopeError> {
    let id = WorkflowId::parse(doc.workflow_id).map_err(EnvelopeError::InvalidWorkflowId)?;
    Ok(StateEnvelope {
        id,
        status: doc.status.unwrap_or(WorkflowStatus::Initialized),
        created_at: doc.created_at.unwrap_or_else(Utc::now),
        references: doc.references,
        summary: doc.summary,
    })
}

fn from_legacy(doc: LegacyEnvelope) -> Result<StateEnvelope, EnvelopeError> {
    let id = WorkflowId::parse(doc.workflow_id).map_err(EnvelopeError::InvalidWorkflowId)?;
    let mut references = IndexMap::new();

    for (key, value) in doc.entries {
        let Some((category, file)) = Category::parse_reference_name(&key) else {
            tracing::warn!(key = %key, "skipping legacy envelope key with no canonical mapping");
            continue;
        };
        match serde_json::from_value::<Reference>(value) {
            Ok(reference) => {
                references.insert(category.reference_name(file), reference);
            }
            Err(err) => {
                // A `{category}_{file}` key whose value is not a reference is
                // a direct field from an older format; tolerated.
                tracing::warn!(key = %key, %err, "legacy envelope key is not a reference");
            }
        }
    }

    Ok(StateEnvelope {
        id,
        status: doc.status.unwrap_or(WorkflowStatus::Initialized),
        created_at: Utc::now(),
        references,
        summary: serde_json::Map::new(),
    })
}
