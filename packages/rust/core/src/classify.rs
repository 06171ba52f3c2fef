//! Classifier: terminal lookup outcome to enrichment result.

use chrono::{DateTime, Utc};

use enricher_shared::{EnrichmentResult, EnrichmentStatus, LookupOutcome, Match, MatchKind};

/// Map the final outcome of a record's lookup to its result.
///
/// `attempts` is the number of counted attempts that led to `outcome` and only
/// shows up in `ERROR` notes. Pure: no I/O, no clock.
pub fn classify(outcome: &LookupOutcome, attempts: u32, timestamp: DateTime<Utc>) -> EnrichmentResult {
    match outcome {
        LookupOutcome::Success { matches } => classify_matches(matches, timestamp),
        LookupOutcome::Empty => not_found("No exact matches found", timestamp),
        LookupOutcome::MalformedPayload { detail } => {
            EnrichmentResult::error(format!("{}: {detail}", outcome.class()), timestamp)
        }
        LookupOutcome::AuthRejected | LookupOutcome::RateLimited { .. } => {
            EnrichmentResult::error(exhausted(outcome, attempts), timestamp)
        }
        LookupOutcome::ServerFault { status } => EnrichmentResult::error(
            format!("{} (HTTP {status})", exhausted(outcome, attempts)),
            timestamp,
        ),
        LookupOutcome::TransportFailure { detail } => EnrichmentResult::error(
            format!("{}: {detail}", exhausted(outcome, attempts)),
            timestamp,
        ),
    }
}

fn classify_matches(matches: &[Match], timestamp: DateTime<Utc>) -> EnrichmentResult {
    let exact: Vec<&Match> = matches
        .iter()
        .filter(|m| m.kind == MatchKind::Exact)
        .collect();

    match exact.as_slice() {
        [] if matches.is_empty() => not_found("No exact matches found", timestamp),
        [] => not_found(
            &format!("{} partial match(es), no exact match", matches.len()),
            timestamp,
        ),
        [only] => from_match(EnrichmentStatus::Found, only, "Exact match found".into(), timestamp),
        [first, ..] => from_match(
            EnrichmentStatus::MultipleMatches,
            first,
            format!("Found {} exact matches - took first", exact.len()),
            timestamp,
        ),
    }
}

fn from_match(
    status: EnrichmentStatus,
    m: &Match,
    note: String,
    timestamp: DateTime<Utc>,
) -> EnrichmentResult {
    EnrichmentResult {
        status,
        phones: m.phones.clone(),
        emails: m.emails.clone(),
        external_id: Some(m.external_id.clone()),
        note,
        timestamp,
    }
}

fn not_found(note: &str, timestamp: DateTime<Utc>) -> EnrichmentResult {
    EnrichmentResult {
        status: EnrichmentStatus::NotFound,
        phones: Vec::new(),
        emails: Vec::new(),
        external_id: None,
        note: note.to_string(),
        timestamp,
    }
}

fn exhausted(outcome: &LookupOutcome, attempts: u32) -> String {
    format!("{} after {attempts} attempt(s)", outcome.class())
}
