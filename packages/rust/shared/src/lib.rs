//! Shared types, error model, collaborator interfaces, and configuration
//! for the enricher.
//!
//! This crate is the foundation depended on by all other enricher crates.
//! It provides:
//! - [`EnricherError`]: the unified error type
//! - Domain types ([`InputRecord`], [`Credential`], [`LookupOutcome`],
//!   [`EnrichmentResult`], [`CheckpointState`])
//! - Collaborator traits ([`RecordSource`], [`LookupProvider`],
//!   [`CredentialAcquirer`], [`OutputSink`])
//! - Configuration ([`AppConfig`], [`RunSettings`], config loading)

pub mod config;
pub mod error;
pub mod interfaces;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, CredentialConfig, CsvConfig, FilesConfig, PacingConfig,
    ProgressConfig, RetryConfig, RetrySettings, RunSettings, TextEncoding, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{EnricherError, Result};
pub use interfaces::{
    CredentialAcquirer, LookupProvider, OutputSink, RawResponse, RecordSource, TransportError,
};
pub use types::{
    CHECKPOINT_SCHEMA_VERSION, CheckpointState, Counters, Credential, EnrichmentResult,
    EnrichmentStatus, InputRecord, LookupOutcome, Match, MatchKind,
};
