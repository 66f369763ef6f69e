//! Inference service seam
//!
//! The pipeline talks to its model endpoint through [`InferenceClient`], a
//! trait small enough to fake in tests and to back with any vendor SDK.
//! Artifacts travel in the same hybrid shape the stores produce: inline
//! base64 for small payloads, references for big ones, and the service side
//! is expected to dereference the latter itself.

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use veristate_envelope::Reference;
use veristate_runtime::ErrorClass;
use veristate_store::{ImageArtifactMetadata, Placement};

/// An artifact as presented to the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ArtifactPayload {
    /// Base64 payload carried in the request
    #[serde(rename_all = "camelCase")]
    Inline {
        /// MIME type of the decoded bytes
        content_type: String,
        /// Base64 payload
        data: String,
    },
    /// Pointer the service dereferences itself
    #[serde(rename_all = "camelCase")]
    Stored {
        /// MIME type of the decoded bytes
        content_type: String,
        /// Where the encoded payload lives
        reference: Reference,
    },
}

impl ArtifactPayload {
    /// Present a stored artifact in the shape its placement dictates
    #[must_use]
    pub fn from_metadata(metadata: &ImageArtifactMetadata) -> Self {
        match &metadata.storage {
            Placement::Inline { inline_data } => Self::Inline {
                content_type: metadata.content_type.clone(),
                data: inline_data.clone(),
            },
            Placement::External { external_ref } => Self::Stored {
                content_type: metadata.content_type.clone(),
                reference: external_ref.clone(),
            },
        }
    }
}

/// One inference invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    /// System prompt
    pub system_prompt: String,
    /// User prompt
    pub user_prompt: String,
    /// Image artifacts, in presentation order
    pub artifacts: Vec<ArtifactPayload>,
}

/// Inference service reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceResponse {
    /// Model output text
    pub text: String,
    /// Input token count, when the service reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    /// Output token count, when the service reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

/// Inference invocation failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    /// The service is shedding load
    #[error("inference throttled: {0}")]
    Throttled(String),

    /// The call exceeded its deadline
    #[error("inference timed out: {0}")]
    Timeout(String),

    /// The service rejected the request as malformed
    #[error("inference rejected request: {0}")]
    InvalidRequest(String),

    /// Any other service-side failure
    #[error("inference service failure: {0}")]
    Service(String),
}

impl InferenceError {
    /// Classification consumed by the retry executor
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Throttled(_) | Self::Timeout(_) | Self::Service(_) => ErrorClass::Retryable,
            Self::InvalidRequest(_) => ErrorClass::Terminal,
        }
    }
}

impl From<InferenceError> for WorkflowError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Throttled(m) => Self::Throttling(m),
            InferenceError::Timeout(m) => Self::Timeout(m),
            InferenceError::InvalidRequest(m) | InferenceError::Service(m) => Self::Inference(m),
        }
    }
}

/// Client for the model endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync {
    /// Invoke the model once
    ///
    /// Implementations do not retry; the caller owns the retry loop.
    ///
    /// # Errors
    /// [`InferenceError`] classified for the retry executor.
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use veristate_runtime::{RetryExecutor, RetryPolicy};

    fn request() -> InferenceRequest {
        InferenceRequest {
            system_prompt: "compare the shelves".into(),
            user_prompt: "report differences".into(),
            artifacts: vec![ArtifactPayload::Inline {
                content_type: "image/png".into(),
                data: "AAAA".into(),
            }],
        }
    }

    #[test]
    fn payload_follows_placement() {
        let inline = ImageArtifactMetadata {
            name: "reference".into(),
            content_type: "image/png".into(),
            size_bytes: 3,
            encoded_size: 4,
            last_modified: None,
            source_location: "s3://src/a.png".into(),
            storage: Placement::Inline { inline_data: "AAAA".into() },
        };
        assert!(matches!(
            ArtifactPayload::from_metadata(&inline),
            ArtifactPayload::Inline { .. }
        ));

        let external = ImageArtifactMetadata {
            storage: Placement::External {
                external_ref: Reference::new("state", "k", 4),
            },
            ..inline
        };
        assert!(matches!(
            ArtifactPayload::from_metadata(&external),
            ArtifactPayload::Stored { .. }
        ));
    }

    #[test]
    fn classification_and_workflow_mapping() {
        assert_eq!(InferenceError::Throttled("x".into()).class(), ErrorClass::Retryable);
        assert_eq!(InferenceError::InvalidRequest("x".into()).class(), ErrorClass::Terminal);

        let e: WorkflowError = InferenceError::Throttled("busy".into()).into();
        assert!(e.retryable());
        let e: WorkflowError = InferenceError::InvalidRequest("bad".into()).into();
        assert!(!e.retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn mock_client_retries_through_executor() {
        let mut mock = MockInferenceClient::new();
        let mut calls = 0u32;
        mock.expect_invoke().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(InferenceError::Throttled("busy".into()))
            } else {
                Ok(InferenceResponse {
                    text: "match".into(),
                    input_tokens: Some(10),
                    output_tokens: Some(2),
                })
            }
        });
        let client: Arc<dyn InferenceClient> = Arc::new(mock);

        let executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            jitter_bound: Duration::from_millis(5),
        });
        let response = executor
            .run(&CancellationToken::new(), InferenceError::class, |_| {
                let client = Arc::clone(&client);
                let request = request();
                async move { client.invoke(request).await }
            })
            .await
            .unwrap();
        assert_eq!(response.text, "match");
    }
}
