//! Stage host control flow
//!
//! Stages are stateless: every invocation receives an inbound document,
//! resolves it to a [`StateEnvelope`], gathers its inputs, runs domain
//! logic, persists what it produced, and emits an outbound document. The
//! host owns that sequence; a [`Stage`] implementation supplies only the
//! domain hook and its input requirements.
//!
//! A failed invocation still emits a well-formed outbound document with the
//! terminal failure status and a structured error, and best-effort persists
//! the failure so the workflow record reflects reality.

use crate::config::StageConfig;
use crate::document::OutboundDocument;
use crate::error::{ErrorInfo, WorkflowError};
use crate::inference::{InferenceClient, InferenceError, InferenceRequest, InferenceResponse};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use veristate_envelope::{
    resolve, Category, EnvelopeInput, StateEnvelope, WorkflowId, WorkflowStatus,
};
use veristate_runtime::{FetchDescriptor, ParallelFetchCoordinator, RetryExecutor};
use veristate_store::{
    BlobStateStore, DocumentStore, DocumentStoreError, HybridArtifactStore, ObjectBlobStore,
    ResponseBudgetTracker, WorkflowRecord,
};

/// Canonical file name of the persisted envelope
const ENVELOPE_FILE: &str = "envelope.json";
/// Canonical file name of the persisted failure record
const ERROR_FILE: &str = "error.json";

/// Everything a stage's domain logic can touch during one invocation
pub struct StageContext {
    /// The envelope this invocation owns
    pub envelope: StateEnvelope,
    /// Results of the gather phase, by descriptor name
    pub fetched: HashMap<String, serde_json::Value>,
    /// State persistence
    pub state: BlobStateStore,
    /// Inline-vs-external artifact placement for this invocation
    pub artifacts: HybridArtifactStore,
    /// Cancellation signal for the invocation
    pub token: CancellationToken,
    inference: Arc<dyn InferenceClient>,
    retry: RetryExecutor,
}

impl StageContext {
    /// Invoke the model through the retry executor
    ///
    /// Throttling, timeouts and service faults are retried under the host's
    /// policy; invalid requests and cancellation abort immediately.
    ///
    /// # Errors
    /// The mapped [`WorkflowError`] of the final failure.
    pub async fn invoke_inference(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, WorkflowError> {
        let client = Arc::clone(&self.inference);
        let response = self
            .retry
            .run(&self.token, InferenceError::class, move |_| {
                let client = Arc::clone(&client);
                let request = request.clone();
                async move { client.invoke(request).await }
            })
            .await?;
        Ok(response)
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("workflow", &self.envelope.id)
            .field("status", &self.envelope.status)
            .field("fetched", &self.fetched.len())
            .finish_non_exhaustive()
    }
}

/// One stage of the verification pipeline
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Stage name, used in keys and logs
    fn name(&self) -> &'static str;

    /// Canonical reference names this stage cannot run without
    fn required_references(&self) -> &[&str] {
        &[]
    }

    /// Fetches to run before the domain hook; empty by default
    fn fetch_plan(&self, envelope: &StateEnvelope) -> Vec<FetchDescriptor> {
        let _ = envelope;
        Vec::new()
    }

    /// Domain logic; returns the status the workflow advances to
    ///
    /// # Errors
    /// Any [`WorkflowError`]; the host turns it into the failure document.
    async fn run(&self, ctx: &mut StageContext) -> Result<WorkflowStatus, WorkflowError>;
}

/// Hosts stage invocations over concrete store and inference backends
pub struct StageHost {
    config: StageConfig,
    state: BlobStateStore,
    documents: Arc<dyn DocumentStore>,
    inference: Arc<dyn InferenceClient>,
}

impl StageHost {
    /// Create a host over the given backends
    #[must_use]
    pub fn new(
        config: StageConfig,
        blobs: Arc<dyn ObjectBlobStore>,
        documents: Arc<dyn DocumentStore>,
        inference: Arc<dyn InferenceClient>,
    ) -> Self {
        Self {
            config,
            state: BlobStateStore::new(blobs),
            documents,
            inference,
        }
    }

    /// The host's configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Create a new workflow, exactly once per id
    ///
    /// Persists a fresh envelope and conditionally creates the workflow
    /// record. Under concurrent duplicate triggers exactly one caller wins;
    /// the rest get `AlreadyExists`.
    ///
    /// # Errors
    /// `WorkflowError::AlreadyExists` on the losing duplicate, storage
    /// errors otherwise.
    pub async fn initialize_workflow(
        &self,
        verification_type: Option<&str>,
    ) -> Result<StateEnvelope, WorkflowError> {
        let mut envelope = StateEnvelope::new(WorkflowId::new());
        if let Some(vt) = verification_type {
            envelope.set_summary("verificationType", serde_json::json!(vt));
        }

        let reference = self
            .state
            .put_json(&envelope.id, Category::Processing, ENVELOPE_FILE, &envelope)
            .await?;
        envelope.add_reference(Category::Processing, ENVELOPE_FILE, reference.clone());

        let mut record =
            WorkflowRecord::new(envelope.id.clone(), reference, self.config.record_ttl);
        if let Some(vt) = verification_type {
            record = record.with_verification_type(vt);
        }
        self.documents.put_if_absent(record).await?;

        tracing::info!(workflow = %envelope.id, "workflow initialized");
        Ok(envelope)
    }

    /// Run one stage invocation end to end
    ///
    /// Never fails outward: every error becomes the terminal failure
    /// document, persisted best-effort before being returned.
    pub async fn execute(
        &self,
        stage: &dyn Stage,
        inbound: EnvelopeInput,
        token: CancellationToken,
    ) -> OutboundDocument {
        let workflow_id = inbound.workflow_id().to_owned();
        tracing::info!(stage = stage.name(), workflow = %workflow_id, "stage invocation started");

        match self.run_stage(stage, inbound, token).await {
            Ok(envelope) => {
                tracing::info!(
                    stage = stage.name(),
                    workflow = %envelope.id,
                    status = %envelope.status,
                    "stage invocation completed"
                );
                OutboundDocument::from_envelope(&envelope)
            }
            Err(error) => {
                tracing::error!(
                    stage = stage.name(),
                    workflow = %workflow_id,
                    %error,
                    retryable = error.retryable(),
                    "stage invocation failed"
                );
                self.record_failure(&workflow_id, &error).await;
                OutboundDocument::failure(&workflow_id, &error)
            }
        }
    }

    async fn run_stage(
        &self,
        stage: &dyn Stage,
        inbound: EnvelopeInput,
        token: CancellationToken,
    ) -> Result<StateEnvelope, WorkflowError> {
        let envelope = resolve(inbound, stage.required_references())?;

        let plan = stage.fetch_plan(&envelope);
        let fetched = if plan.is_empty() {
            HashMap::new()
        } else {
            let coordinator = ParallelFetchCoordinator::new(self.config.max_concurrent_fetches);
            coordinator.gather(plan, &token).await?
        };

        let tracker = Arc::new(ResponseBudgetTracker::new(self.config.usable_ceiling()));
        let artifacts = HybridArtifactStore::new(
            Arc::clone(self.state.blobs()),
            tracker,
            self.config.placement(),
            envelope.id.clone(),
        );

        let mut ctx = StageContext {
            envelope,
            fetched,
            state: self.state.clone(),
            artifacts,
            token,
            inference: Arc::clone(&self.inference),
            retry: RetryExecutor::new(self.config.retry),
        };

        let status = stage.run(&mut ctx).await?;
        let mut envelope = ctx.envelope;
        envelope.set_status(status);

        let reference = self
            .state
            .put_json(&envelope.id, Category::Processing, ENVELOPE_FILE, &envelope)
            .await?;
        envelope.add_reference(Category::Processing, ENVELOPE_FILE, reference.clone());

        match self
            .documents
            .update(&envelope.id, envelope.status, reference.clone())
            .await
        {
            Ok(()) => {}
            // A stage invoked without prior initialization still gets a record
            Err(DocumentStoreError::NotFound(_)) => {
                let record =
                    WorkflowRecord::new(envelope.id.clone(), reference, self.config.record_ttl);
                if let Err(e) = self.documents.put_if_absent(record).await {
                    if !matches!(e, DocumentStoreError::AlreadyExists(_)) {
                        return Err(e.into());
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }

        Ok(envelope)
    }

    /// Best-effort persistence of a failure, so the record and state store
    /// reflect the terminal status even though the document already reports it
    async fn record_failure(&self, workflow_id: &str, error: &WorkflowError) {
        let Ok(id) = WorkflowId::parse(workflow_id) else {
            return;
        };
        let info = ErrorInfo::from_error(error);
        match self
            .state
            .put_json(&id, Category::Processing, ERROR_FILE, &info)
            .await
        {
            Ok(reference) => {
                if let Err(e) = self
                    .documents
                    .update(&id, WorkflowStatus::Failed, reference)
                    .await
                {
                    tracing::warn!(workflow = %id, %e, "could not mark workflow record failed");
                }
            }
            Err(e) => {
                tracing::warn!(workflow = %id, %e, "could not persist failure state");
            }
        }
    }
}

impl std::fmt::Debug for StageHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageHost")
            .field("state", &self.state)
            .field("workflow_table", &self.config.workflow_table)
            .finish_non_exhaustive()
    }
}
