//! Collaborator interfaces consumed by the pipeline core.
//!
//! Implementations live in `enricher-storage` (record source, output sink)
//! and `enricher-remote` (lookup provider, credential acquisition); tests
//! substitute scripted fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Credential, EnrichmentResult, InputRecord};

/// Raw HTTP result of one lookup, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, if any.
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// The request never produced an HTTP status (connect error, timeout, reset).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Performs one remote lookup. Opaque to the core beyond status and body.
#[async_trait]
pub trait LookupProvider: Send + Sync {
    async fn perform_lookup(
        &self,
        query_key: &str,
        credential: &Credential,
    ) -> std::result::Result<RawResponse, TransportError>;
}

/// Mints a fresh credential (browser automation, login flow, env var, ...).
#[async_trait]
pub trait CredentialAcquirer: Send + Sync {
    async fn acquire(&self) -> Result<Credential>;
}

/// Ordered input records, addressable by index so iteration can resume anywhere.
pub trait RecordSource {
    /// Record at `index`, or `None` past the end.
    fn record_at(&mut self, index: u64) -> Result<Option<InputRecord>>;

    /// Total number of records, when known up front.
    fn total(&self) -> Option<u64> {
        None
    }
}

impl RecordSource for Vec<InputRecord> {
    fn record_at(&mut self, index: u64) -> Result<Option<InputRecord>> {
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| self.get(i))
            .cloned())
    }

    fn total(&self) -> Option<u64> {
        Some(self.len() as u64)
    }
}

/// Append-only output. A successful `append` is durable.
pub trait OutputSink {
    /// Append one row and return the committed length of the output.
    fn append(&mut self, record: &InputRecord, result: &EnrichmentResult) -> Result<u64>;
}
