//! End-to-end stage invocation over in-memory backends
//!
//! Drives a realistic image-comparison stage through the host: legacy
//! inbound document, parallel gather, hybrid artifact placement, a throttled
//! inference call that succeeds on retry, and the outbound hand-off.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use veristate_core::prelude::*;

const MB: u64 = 1_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Raw byte count whose base64 encoding is exactly `encoded` bytes long
fn raw_len_for_encoded(encoded: u64) -> usize {
    (encoded as usize) / 4 * 3
}

/// Throttles the first call, answers the second
struct FlakyInference {
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl InferenceClient for FlakyInference {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(InferenceError::Throttled("model busy".into()));
        }
        Ok(InferenceResponse {
            text: format!("compared {} artifact(s): MATCH", request.artifacts.len()),
            input_tokens: Some(1200),
            output_tokens: Some(40),
        })
    }
}

struct CompareImagesStage;

#[async_trait::async_trait]
impl Stage for CompareImagesStage {
    fn name(&self) -> &'static str {
        "compare-images"
    }

    fn required_references(&self) -> &[&str] {
        &["processing_initialization"]
    }

    fn fetch_plan(&self, _envelope: &StateEnvelope) -> Vec<FetchDescriptor> {
        vec![
            FetchDescriptor::required("reference_image", |_| async {
                Ok(serde_json::json!({ "location": "src://layouts/vm-3002.png" }))
            }),
            FetchDescriptor::required("checking_image", |_| async {
                Ok(serde_json::json!({ "location": "src://captures/vm-3002.png" }))
            }),
            // Best-effort; this workflow has no prior runs
            FetchDescriptor::optional("previous_result", |_| async {
                Err(FetchError::source("no prior verification"))
            }),
        ]
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<WorkflowStatus, WorkflowError> {
        assert_eq!(ctx.fetched["previous_result"], serde_json::Value::Null);

        // 3 MB and 4 MB encoded: the first rides inline, the second would
        // blow the shared response budget and goes external.
        let reference_raw = vec![0x89u8; raw_len_for_encoded(3 * MB)];
        let checking_raw = vec![0xFFu8; raw_len_for_encoded(4 * MB)];

        let reference = ctx
            .artifacts
            .store(
                &ArtifactSource::new(
                    "reference",
                    "image/png",
                    ctx.fetched["reference_image"]["location"]
                        .as_str()
                        .unwrap_or_default(),
                ),
                &reference_raw,
            )
            .await?;
        let checking = ctx
            .artifacts
            .store(
                &ArtifactSource::new(
                    "checking",
                    "image/png",
                    ctx.fetched["checking_image"]["location"]
                        .as_str()
                        .unwrap_or_default(),
                ),
                &checking_raw,
            )
            .await?;

        assert!(reference.storage.is_inline());
        assert!(!checking.storage.is_inline());

        ctx.state
            .save_to_envelope(
                &mut ctx.envelope,
                Category::Images,
                "metadata.json",
                &vec![reference.clone(), checking.clone()],
            )
            .await?;

        let response = ctx
            .invoke_inference(InferenceRequest {
                system_prompt: "You compare shelf layouts against live captures.".into(),
                user_prompt: "Report any differences between the two images.".into(),
                artifacts: vec![
                    ArtifactPayload::from_metadata(&reference),
                    ArtifactPayload::from_metadata(&checking),
                ],
            })
            .await?;

        ctx.state
            .save_to_envelope(
                &mut ctx.envelope,
                Category::Responses,
                "analysis.json",
                &serde_json::json!({ "text": response.text }),
            )
            .await?;
        ctx.envelope.set_summary("imageCount", serde_json::json!(2));
        ctx.envelope
            .set_summary("outputTokens", serde_json::json!(response.output_tokens));

        Ok(WorkflowStatus::InferenceCompleted)
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        jitter_bound: Duration::from_millis(1),
    }
}

#[tokio::test]
async fn legacy_inbound_document_runs_the_full_stage() {
    init_tracing();
    let blobs = Arc::new(MemoryBlobStore::new("verification-state"));
    let documents = Arc::new(MemoryDocumentStore::new());
    let host = StageHost::new(
        StageConfig::default().with_retry(fast_retry()),
        Arc::clone(&blobs) as Arc<dyn ObjectBlobStore>,
        Arc::clone(&documents) as Arc<dyn DocumentStore>,
        Arc::new(FlakyInference { calls: AtomicU32::new(0) }),
    );

    // Legacy flat-map wire format from an older upstream stage
    let inbound = EnvelopeInput::from_json(serde_json::json!({
        "verificationId": "verif-int-1",
        "vendingMachineId": "VM-3002",
        "processing_initialization": {
            "store": "verification-state",
            "key": "2026/08/29/verif-int-1/processing/initialization.json",
            "size": 128
        }
    }))
    .unwrap();

    let doc = host
        .execute(&CompareImagesStage, inbound, CancellationToken::new())
        .await;

    assert_eq!(doc.status, WorkflowStatus::InferenceCompleted);
    assert!(doc.error.is_none());
    assert_eq!(doc.workflow_id, "verif-int-1");
    assert_eq!(doc.summary["imageCount"], 2);

    // References for the next stage: carried-over, stage-written, and the
    // persisted envelope itself
    assert!(doc.references.contains_key("processing_initialization"));
    assert!(doc.references.contains_key("images_metadata"));
    assert!(doc.references.contains_key("responses_analysis"));
    assert!(doc.references.contains_key("processing_envelope"));

    // The workflow record tracks the outcome
    let id = WorkflowId::parse("verif-int-1").unwrap();
    let record = documents.get(&id).await.unwrap();
    assert_eq!(record.status, WorkflowStatus::InferenceCompleted);

    // The stored image metadata round-trips and keeps its placements
    let state = BlobStateStore::new(Arc::clone(&blobs) as Arc<dyn ObjectBlobStore>);
    let stored: Vec<ImageArtifactMetadata> = state
        .get_json(&doc.references["images_metadata"])
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored[0].storage.is_inline());
    assert!(!stored[1].storage.is_inline());
}

#[tokio::test]
async fn cancelled_invocation_fails_without_partial_results() {
    init_tracing();
    let blobs = Arc::new(MemoryBlobStore::new("verification-state"));
    let host = StageHost::new(
        StageConfig::default().with_retry(fast_retry()),
        blobs as Arc<dyn ObjectBlobStore>,
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(FlakyInference { calls: AtomicU32::new(0) }),
    );

    let inbound = EnvelopeInput::from_json(serde_json::json!({
        "verificationId": "verif-int-2",
        "processing_initialization": {
            "store": "verification-state",
            "key": "2026/08/29/verif-int-2/processing/initialization.json",
            "size": 128
        }
    }))
    .unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let doc = host.execute(&CompareImagesStage, inbound, token).await;
    assert_eq!(doc.status, WorkflowStatus::Failed);
    let error = doc.error.unwrap();
    assert!(!error.retryable);
    assert!(doc.references.is_empty());
}
