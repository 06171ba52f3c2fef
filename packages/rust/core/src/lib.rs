//! Resumable, rate-limited enrichment pipeline.
//!
//! - [`CredentialLease`]: holds the bearer credential, refreshes it near expiry or on rejection
//! - [`RequestExecutor`]: one bounded remote call, reduced to a `LookupOutcome`
//! - [`RetryPolicy`]: backoff for transient outcome classes
//! - [`classify`]: outcome to `EnrichmentResult`
//! - [`PipelineController`]: the record loop, checkpoint cadence, cancellation

pub mod classify;
pub mod executor;
pub mod lease;
pub mod pipeline;
pub mod retry;
pub mod session;

pub use classify::classify;
pub use executor::{RequestExecutor, interpret};
pub use lease::CredentialLease;
pub use pipeline::{
    PipelineController, PipelineParts, PipelineState, ProgressReporter, RunSummary,
    SilentProgress, StopReason,
};
pub use retry::RetryPolicy;
