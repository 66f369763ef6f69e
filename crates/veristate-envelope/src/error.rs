//! Envelope and resolution errors

/// Errors produced while building or resolving envelopes
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Required canonical references remained unmapped after both the
    /// structured and legacy resolution paths were tried
    #[error("missing required references: {}", .0.join(", "))]
    MissingReferences(Vec<String>),

    /// Inbound workflow id was empty or malformed
    #[error("invalid workflow id: {0:?}")]
    InvalidWorkflowId(String),

    /// Inbound document matched neither wire format
    #[error("malformed envelope document: {0}")]
    Malformed(String),
}

impl EnvelopeError {
    /// Names of the references this error complains about, if any
    #[must_use]
    pub fn missing_names(&self) -> &[String] {
        match self {
            EnvelopeError::MissingReferences(names) => names,
            _ => &[],
        }
    }
}
