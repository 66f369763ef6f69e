//! Parallel fetch coordination
//!
//! A stage typically needs several independent inputs before it can run:
//! artifacts, prior-stage outputs, lookups against external services. The
//! coordinator runs those fetches concurrently, waits for *all* of them, and
//! reports either the complete result set or an error enumerating every
//! failure. Callers never see a partial result set.
//!
//! Each fetch is `Required` or `Optional`. A failed optional fetch is
//! replaced by its placeholder value and logged; a failed required fetch
//! fails the whole gather.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Whether a failed fetch fails the whole gather
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requiredness {
    /// Failure fails the gather
    Required,
    /// Failure substitutes the placeholder value
    Optional,
}

/// Failure of a single fetch operation
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// The underlying source reported an error
    #[error("{message}")]
    Source {
        /// Human-readable failure description
        message: String,
        /// Whether a retry of the whole invocation could succeed
        transient: bool,
    },

    /// The gather was cancelled before this fetch completed
    #[error("fetch cancelled")]
    Cancelled,

    /// The fetch task panicked
    #[error("fetch panicked: {0}")]
    Panicked(String),
}

impl FetchError {
    /// Build a non-transient source failure
    #[must_use]
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
            transient: false,
        }
    }

    /// Build a transient source failure
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
            transient: true,
        }
    }

    /// Whether a retry of the invocation could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Source { transient, .. } => *transient,
            Self::Cancelled => false,
            Self::Panicked(_) => false,
        }
    }
}

/// One named failure within a gather
#[derive(Debug, Clone)]
pub struct FetchFailure {
    /// Descriptor name of the failed fetch
    pub name: String,
    /// What went wrong
    pub error: FetchError,
}

/// All failures from one gather
///
/// Every failure is enumerated so a single log line tells the operator the
/// full story instead of only the first casualty.
#[derive(Debug, Clone)]
pub struct AggregateFetchError {
    /// Failures sorted by descriptor name
    pub failures: Vec<FetchFailure>,
}

impl std::error::Error for AggregateFetchError {}

impl AggregateFetchError {
    /// Whether every failure is transient
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.failures.iter().all(|f| f.error.is_transient())
    }
}

impl std::fmt::Display for AggregateFetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} fetch(es) failed:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " [{}: {}]", failure.name, failure.error)?;
        }
        Ok(())
    }
}

type FetchOp =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<serde_json::Value, FetchError>> + Send>;

/// A named fetch operation with its failure semantics
pub struct FetchDescriptor {
    name: String,
    requiredness: Requiredness,
    placeholder: serde_json::Value,
    op: FetchOp,
}

impl FetchDescriptor {
    /// A fetch whose failure fails the whole gather
    pub fn required<F, Fut>(name: impl Into<String>, op: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, FetchError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            requiredness: Requiredness::Required,
            placeholder: serde_json::Value::Null,
            op: Box::new(move |token| Box::pin(op(token))),
        }
    }

    /// A fetch whose failure substitutes a placeholder (null by default)
    pub fn optional<F, Fut>(name: impl Into<String>, op: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, FetchError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            requiredness: Requiredness::Optional,
            placeholder: serde_json::Value::Null,
            op: Box::new(move |token| Box::pin(op(token))),
        }
    }

    /// Override the value substituted when an optional fetch fails
    #[must_use]
    pub fn with_placeholder(mut self, placeholder: serde_json::Value) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Descriptor name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FetchDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchDescriptor")
            .field("name", &self.name)
            .field("requiredness", &self.requiredness)
            .finish_non_exhaustive()
    }
}

struct FetchOutcome {
    name: String,
    requiredness: Requiredness,
    placeholder: serde_json::Value,
    result: Result<serde_json::Value, FetchError>,
}

/// Runs a set of fetches concurrently and waits for all of them
#[derive(Debug, Clone)]
pub struct ParallelFetchCoordinator {
    max_concurrent: usize,
}

impl ParallelFetchCoordinator {
    /// Create a coordinator running at most `max_concurrent` fetches at once
    ///
    /// A limit of zero is treated as one.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run every descriptor, wait for all, and aggregate
    ///
    /// Cancellation aborts in-flight fetches and surfaces them as failures;
    /// a cancelled gather never produces a result map, even for the fetches
    /// that finished in time.
    ///
    /// # Errors
    /// [`AggregateFetchError`] enumerating every required fetch that failed
    /// and every fetch cut short by cancellation.
    pub async fn gather(
        &self,
        descriptors: Vec<FetchDescriptor>,
        token: &CancellationToken,
    ) -> Result<HashMap<String, serde_json::Value>, AggregateFetchError> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<FetchOutcome> = JoinSet::new();
        let mut task_names: HashMap<tokio::task::Id, String> = HashMap::new();

        for descriptor in descriptors {
            let permits = Arc::clone(&permits);
            let token = token.clone();
            let descriptor_name = descriptor.name.clone();
            let handle = tasks.spawn(async move {
                let FetchDescriptor {
                    name,
                    requiredness,
                    placeholder,
                    op,
                } = descriptor;
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => tokio::select! {
                        () = token.cancelled() => Err(FetchError::Cancelled),
                        r = op(token.clone()) => r,
                    },
                    // Semaphore lives as long as the gather; closed means
                    // the runtime is tearing down.
                    Err(_) => Err(FetchError::Cancelled),
                };
                FetchOutcome {
                    name,
                    requiredness,
                    placeholder,
                    result,
                }
            });
            task_names.insert(handle.id(), descriptor_name);
        }

        let mut results = HashMap::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next_with_id().await {
            let outcome = match joined {
                Ok((_, outcome)) => outcome,
                Err(e) => {
                    // A panicked fetch is still attributed to its descriptor
                    let name = task_names
                        .get(&e.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_owned());
                    failures.push(FetchFailure {
                        name,
                        error: FetchError::Panicked(e.to_string()),
                    });
                    continue;
                }
            };
            match outcome.result {
                Ok(value) => {
                    results.insert(outcome.name, value);
                }
                Err(FetchError::Cancelled) => {
                    // No partial success under cancellation, optional or not
                    failures.push(FetchFailure {
                        name: outcome.name,
                        error: FetchError::Cancelled,
                    });
                }
                Err(error) if outcome.requiredness == Requiredness::Optional => {
                    tracing::warn!(
                        fetch = %outcome.name,
                        %error,
                        "optional fetch failed, substituting placeholder"
                    );
                    results.insert(outcome.name, outcome.placeholder);
                }
                Err(error) => {
                    failures.push(FetchFailure {
                        name: outcome.name,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            tracing::debug!(fetched = results.len(), "gather complete");
            Ok(results)
        } else {
            failures.sort_by(|a, b| a.name.cmp(&b.name));
            let error = AggregateFetchError { failures };
            tracing::warn!(%error, "gather failed");
            Err(error)
        }
    }
}
