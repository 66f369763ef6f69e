//! Execution primitives for verification stages
//!
//! Two concerns live here, both independent of what is being fetched or
//! retried:
//!
//! - **Parallel fetch** ([`fetch`]): run a set of named async operations
//!   concurrently, wait for all of them, and either hand back every result
//!   or an error enumerating every failure.
//! - **Bounded retry** ([`retry`]): re-run a fallible async operation with
//!   exponential backoff and jitter, stopping early on terminal errors or
//!   cancellation.

pub mod fetch;
pub mod retry;

pub use fetch::{
    AggregateFetchError, FetchDescriptor, FetchError, FetchFailure, ParallelFetchCoordinator,
    Requiredness,
};
pub use retry::{ErrorClass, RetryError, RetryExecutor, RetryPolicy};

/// Crate version, for diagnostics
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
