//! Core domain types: input records, credentials, lookup outcomes,
//! enrichment results and the checkpoint state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EnricherError, Result};

/// Current schema version for the checkpoint file format.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// InputRecord
// ---------------------------------------------------------------------------

/// One entity from the input list. Immutable once produced by a record source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    /// Stable identifier, unique across the input.
    pub id: String,
    /// Search string sent to the remote side.
    pub query_key: String,
    /// Every input column, verbatim and in header order.
    pub fields: Vec<String>,
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A bearer credential with a bounded validity window.
///
/// Never mutated in place: a refresh produces a new `Credential` that replaces
/// the old one.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the credential may still be used at `now`, keeping `margin`
    /// in reserve before `expires_at`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        // Negative remaining time fails the conversion: already expired.
        match (self.expires_at - now).to_std() {
            Ok(remaining) => remaining > margin,
            Err(_) => false,
        }
    }
}

// Tokens end up in logs through `?credential` otherwise.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Lookup outcomes
// ---------------------------------------------------------------------------

/// Whether the remote side flagged a match as an exact-name match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Partial,
}

/// A single remote match with normalized contact fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub external_id: String,
    /// Deduplicated, in remote order.
    pub phones: Vec<String>,
    /// Deduplicated, in remote order.
    pub emails: Vec<String>,
    pub kind: MatchKind,
}

/// Result of one lookup attempt. Exactly one variant holds per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Parsed matches, in the order the remote returned them.
    Success { matches: Vec<Match> },
    /// The remote returned an empty result set.
    Empty,
    /// HTTP 401/403: the credential was refused.
    AuthRejected,
    /// HTTP 429, with the server's `Retry-After` hint when present.
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 5xx.
    ServerFault { status: u16 },
    /// Connect error, timeout, or broken body stream.
    TransportFailure { detail: String },
    /// Body could not be interpreted, or a status outside the known taxonomy.
    MalformedPayload { detail: String },
}

impl LookupOutcome {
    /// Stable snake_case name of the outcome class, used in notes and logs.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Empty => "empty",
            Self::AuthRejected => "auth_rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerFault { .. } => "server_fault",
            Self::TransportFailure { .. } => "transport_failure",
            Self::MalformedPayload { .. } => "malformed_payload",
        }
    }
}

// ---------------------------------------------------------------------------
// EnrichmentResult
// ---------------------------------------------------------------------------

/// Final per-record status written to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentStatus {
    Found,
    NotFound,
    MultipleMatches,
    Error,
}

impl EnrichmentStatus {
    /// Output column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "FOUND",
            Self::NotFound => "NOT_FOUND",
            Self::MultipleMatches => "MULTIPLE_MATCHES",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enrichment derived for one input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentResult {
    pub status: EnrichmentStatus,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub external_id: Option<String>,
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

impl EnrichmentResult {
    /// An `ERROR` result. Carries no contact fields.
    pub fn error(note: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            status: EnrichmentStatus::Error,
            phones: Vec::new(),
            emails: Vec::new(),
            external_id: None,
            note: note.into(),
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Aggregate per-status counters. Always sum to `processed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub processed: u64,
    pub found: u64,
    pub not_found: u64,
    pub multiple_matches: u64,
    pub errors: u64,
}

impl Counters {
    /// Count one committed record.
    pub fn record(&mut self, status: EnrichmentStatus) {
        self.processed += 1;
        match status {
            EnrichmentStatus::Found => self.found += 1,
            EnrichmentStatus::NotFound => self.not_found += 1,
            EnrichmentStatus::MultipleMatches => self.multiple_matches += 1,
            EnrichmentStatus::Error => self.errors += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.found + self.not_found + self.multiple_matches + self.errors == self.processed
    }

    /// Percentage of `part` over processed records, 0.0 when nothing ran yet.
    pub fn percent(&self, part: u64) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            part as f64 * 100.0 / self.processed as f64
        }
    }
}

/// Durable progress marker, owned by the pipeline controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub schema_version: u32,
    /// Identifies the logical run across resumes.
    pub run_id: Uuid,
    /// SHA-256 of the input file this run was started against.
    pub input_fingerprint: String,
    /// Index of the last fully committed record; `None` before the first one.
    pub last_processed_index: Option<u64>,
    pub last_processed_id: Option<String>,
    #[serde(flatten)]
    pub counters: Counters,
    /// Committed byte length of the output file.
    pub output_offset: u64,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl CheckpointState {
    /// State for a run that has not committed anything yet.
    pub fn fresh(input_fingerprint: impl Into<String>, output_offset: u64) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            run_id: Uuid::now_v7(),
            input_fingerprint: input_fingerprint.into(),
            last_processed_index: None,
            last_processed_id: None,
            counters: Counters::default(),
            output_offset,
            started_at: now,
            last_updated: now,
        }
    }

    /// Index of the next record to process.
    pub fn next_index(&self) -> u64 {
        self.last_processed_index.map_or(0, |i| i + 1)
    }

    /// Record that `index` has been appended to the output and acknowledged.
    ///
    /// `index` must be strictly greater than the last committed index.
    pub fn advance(
        &mut self,
        index: u64,
        id: &str,
        status: EnrichmentStatus,
        output_offset: u64,
    ) -> Result<()> {
        if let Some(last) = self.last_processed_index {
            if index <= last {
                return Err(EnricherError::validation(format!(
                    "checkpoint index must increase: {index} <= {last}"
                )));
            }
        }
        self.last_processed_index = Some(index);
        self.last_processed_id = Some(id.to_string());
        self.counters.record(status);
        self.output_offset = output_offset;
        self.last_updated = Utc::now();
        Ok(())
    }
}
