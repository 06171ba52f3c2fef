//! Error types for the enricher.
//!
//! Library crates use [`EnricherError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Per-record failures never show up here: they are [`LookupOutcome`] values
//! that end up as `ERROR` rows. Only setup-time and durability failures are
//! errors in this sense.
//!
//! [`LookupOutcome`]: crate::types::LookupOutcome

use std::path::PathBuf;

/// Top-level error type for all enricher operations.
#[derive(Debug, thiserror::Error)]
pub enum EnricherError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the per-record lookup path (client setup, etc.).
    #[error("network error: {0}")]
    Network(String),

    /// Input parsing error (CSV, JSON, token payloads).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Checkpoint or output storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The credential acquisition function failed after its retry budget.
    /// Fatal: no record can proceed without a credential.
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// The output sink could not durably append a row. Fatal.
    #[error("output write failure at {path:?}: {source}")]
    OutputWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A persisted checkpoint is unreadable or inconsistent with the run.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EnricherError>;

impl EnricherError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a `std::io::Error` raised while appending to the output.
    pub fn output_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::OutputWrite {
            path: path.into(),
            source,
        }
    }
}
