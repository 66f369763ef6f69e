//! Workflow error taxonomy
//!
//! Every failure a stage can hit collapses into [`WorkflowError`], whose
//! `retryable()` classification drives the retry executor and whose wire
//! form ([`ErrorInfo`]) rides the outbound document so orchestration can
//! branch without parsing message strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veristate_envelope::EnvelopeError;
use veristate_runtime::{AggregateFetchError, ErrorClass, RetryError};
use veristate_store::{DocumentStoreError, HybridStoreError, StorageError};

/// Failure of a stage invocation
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Malformed or incomplete input
    #[error("validation failure: {0}")]
    Validation(String),

    /// A referenced object or record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Conditional create lost to an existing workflow record
    #[error("workflow already exists: {0}")]
    AlreadyExists(String),

    /// A dependency is shedding load
    #[error("throttled: {0}")]
    Throttling(String),

    /// A dependency took too long
    #[error("timed out: {0}")]
    Timeout(String),

    /// Object or document storage failure
    #[error("storage failure: {0}")]
    Storage(String),

    /// One or more parallel fetches failed
    #[error(transparent)]
    AggregateFetch(#[from] AggregateFetchError),

    /// The invocation was cancelled
    #[error("invocation cancelled")]
    Cancelled,

    /// The inference service failed
    #[error("inference failure: {0}")]
    Inference(String),
}

impl WorkflowError {
    /// Whether re-running the whole invocation could succeed
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::Throttling(_) | Self::Timeout(_) | Self::Storage(_) => true,
            Self::AggregateFetch(e) => e.is_transient(),
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::AlreadyExists(_)
            | Self::Cancelled
            | Self::Inference(_) => false,
        }
    }

    /// Stable machine-readable code for the wire
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::Throttling(_) => "THROTTLING_ERROR",
            Self::Timeout(_) => "TIMEOUT_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::AggregateFetch(_) => "FETCH_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Inference(_) => "INFERENCE_ERROR",
        }
    }

    /// Classification consumed by the retry executor
    #[inline]
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        if self.retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Terminal
        }
    }
}

impl From<EnvelopeError> for WorkflowError {
    fn from(e: EnvelopeError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<StorageError> for WorkflowError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { .. } => Self::NotFound(e.to_string()),
            StorageError::Serialization(_) => Self::Validation(e.to_string()),
            StorageError::Backend { .. } => Self::Storage(e.to_string()),
        }
    }
}

impl From<DocumentStoreError> for WorkflowError {
    fn from(e: DocumentStoreError) -> Self {
        match e {
            DocumentStoreError::AlreadyExists(id) => Self::AlreadyExists(id.to_string()),
            DocumentStoreError::NotFound(id) => Self::NotFound(format!("workflow record {id}")),
            DocumentStoreError::Backend(message) => Self::Storage(message),
        }
    }
}

impl From<HybridStoreError> for WorkflowError {
    fn from(e: HybridStoreError) -> Self {
        match e {
            HybridStoreError::Storage(inner) => inner.into(),
            HybridStoreError::CorruptEncoding { .. } | HybridStoreError::NotInline(_) => {
                Self::Validation(e.to_string())
            }
        }
    }
}

impl<E> From<RetryError<E>> for WorkflowError
where
    E: Into<WorkflowError>,
{
    fn from(e: RetryError<E>) -> Self {
        match e {
            RetryError::Cancelled => Self::Cancelled,
            RetryError::Terminal { source, .. } => source.into(),
            RetryError::Exhausted { attempts, source } => {
                // Exhaustion means the transient fault persisted past the
                // budget; the cause's own classification stands.
                tracing::warn!(attempts, "retry budget exhausted");
                source.into()
            }
        }
    }
}

/// Error object carried on the outbound document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Whether re-running the invocation could succeed
    pub retryable: bool,
    /// Structured context, failure-specific
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    /// Build the wire error for a workflow failure
    #[must_use]
    pub fn from_error(error: &WorkflowError) -> Self {
        let mut details = serde_json::Map::new();
        if let WorkflowError::AggregateFetch(e) = error {
            let failed: Vec<serde_json::Value> = e
                .failures
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "name": f.name,
                        "error": f.error.to_string(),
                    })
                })
                .collect();
            details.insert("failedFetches".to_owned(), serde_json::Value::Array(failed));
        }
        Self {
            code: error.code().to_owned(),
            message: error.to_string(),
            retryable: error.retryable(),
            details,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use veristate_runtime::{FetchError, FetchFailure};

    #[test]
    fn retryable_classification() {
        assert!(WorkflowError::Throttling("busy".into()).retryable());
        assert!(WorkflowError::Timeout("slow".into()).retryable());
        assert!(WorkflowError::Storage("io".into()).retryable());
        assert!(!WorkflowError::Validation("bad".into()).retryable());
        assert!(!WorkflowError::AlreadyExists("verif-1".into()).retryable());
        assert!(!WorkflowError::Cancelled.retryable());
    }

    #[test]
    fn aggregate_fetch_retryable_only_if_all_transient() {
        let transient = WorkflowError::AggregateFetch(AggregateFetchError {
            failures: vec![FetchFailure {
                name: "images".into(),
                error: FetchError::transient("throttled"),
            }],
        });
        assert!(transient.retryable());

        let mixed = WorkflowError::AggregateFetch(AggregateFetchError {
            failures: vec![
                FetchFailure {
                    name: "images".into(),
                    error: FetchError::transient("throttled"),
                },
                FetchFailure {
                    name: "prompt".into(),
                    error: FetchError::source("missing"),
                },
            ],
        });
        assert!(!mixed.retryable());
    }

    #[test]
    fn storage_not_found_maps_to_not_found() {
        let e: WorkflowError = StorageError::NotFound { key: "a/b".into() }.into();
        assert!(matches!(e, WorkflowError::NotFound(_)));
        assert_eq!(e.code(), "NOT_FOUND");
    }

    #[test]
    fn error_info_carries_fetch_details() {
        let error = WorkflowError::AggregateFetch(AggregateFetchError {
            failures: vec![FetchFailure {
                name: "images".into(),
                error: FetchError::source("missing"),
            }],
        });
        let info = ErrorInfo::from_error(&error);
        assert_eq!(info.code, "FETCH_ERROR");
        assert!(!info.retryable);
        assert_eq!(info.details["failedFetches"][0]["name"], "images");
    }

    #[test]
    fn error_info_wire_shape() {
        let info = ErrorInfo::from_error(&WorkflowError::Timeout("inference".into()));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["code"], "TIMEOUT_ERROR");
        assert_eq!(json["retryable"], true);
        assert!(json.get("details").is_none());
        assert!(json["timestamp"].is_string());
    }
}
