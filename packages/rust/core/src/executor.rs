//! Request executor: one remote call, reduced to a [`LookupOutcome`].
//!
//! Nothing here raises. Timeouts, transport errors, odd statuses and bodies
//! that do not parse all become outcome variants for the retry policy and the
//! classifier to act on.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use enricher_shared::{Credential, LookupOutcome, LookupProvider, Match, MatchKind, RawResponse};

/// Key of the exact-match array inside `list`.
const EXACT_KEY: &str = "exact";

pub struct RequestExecutor {
    provider: Arc<dyn LookupProvider>,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(provider: Arc<dyn LookupProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Perform one lookup, bounded by the request timeout.
    pub async fn lookup(&self, query_key: &str, credential: &Credential) -> LookupOutcome {
        let call = self.provider.perform_lookup(query_key, credential);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => LookupOutcome::TransportFailure {
                detail: format!("timed out after {}s", self.timeout.as_secs_f64()),
            },
            Ok(Err(e)) => LookupOutcome::TransportFailure { detail: e.0 },
            Ok(Ok(raw)) => interpret(&raw),
        };
        debug!(query_key, outcome = outcome.class(), "lookup finished");
        outcome
    }
}

/// Map an HTTP status and body onto the outcome taxonomy.
pub fn interpret(raw: &RawResponse) -> LookupOutcome {
    match raw.status {
        401 | 403 => LookupOutcome::AuthRejected,
        429 => LookupOutcome::RateLimited {
            retry_after: raw.retry_after,
        },
        500..=599 => LookupOutcome::ServerFault { status: raw.status },
        200..=299 => match parse_matches(&raw.body) {
            Ok(matches) if matches.is_empty() => LookupOutcome::Empty,
            Ok(matches) => LookupOutcome::Success { matches },
            Err(detail) => LookupOutcome::MalformedPayload { detail },
        },
        other => LookupOutcome::MalformedPayload {
            detail: format!("unexpected HTTP status {other}"),
        },
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    list: serde_json::Map<String, Value>,
}

#[derive(Deserialize)]
struct RawMatch {
    #[serde(default)]
    identifiant: Value,
    #[serde(default)]
    telephone: Value,
    #[serde(default)]
    emails: Value,
}

/// Exact matches first in remote order, then partial ones.
fn parse_matches(body: &str) -> Result<Vec<Match>, String> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| format!("invalid response body: {e}"))?;

    let mut groups: Vec<(&String, &Value)> = response.list.iter().collect();
    groups.sort_by_key(|(key, _)| key.as_str() != EXACT_KEY);

    let mut matches = Vec::new();
    for (key, entries) in groups {
        let kind = if key == EXACT_KEY {
            MatchKind::Exact
        } else {
            MatchKind::Partial
        };
        let entries: &[Value] = match entries {
            Value::Array(items) => items.as_slice(),
            Value::Null => &[],
            other => return Err(format!("list.{key} is not an array: {}", type_name(other))),
        };

        for (i, entry) in entries.iter().enumerate() {
            let raw: RawMatch = serde_json::from_value(entry.clone())
                .map_err(|e| format!("list.{key}[{i}]: {e}"))?;
            let external_id = scalar_string(&raw.identifiant)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| format!("list.{key}[{i}] has no identifiant"))?;

            matches.push(Match {
                external_id,
                phones: normalize(&raw.telephone, normalize_phone),
                emails: normalize(&raw.emails, normalize_email),
                kind,
            });
        }
    }
    Ok(matches)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts an array of scalars or a single scalar; drops blanks and duplicates.
fn normalize(value: &Value, clean: fn(&str) -> String) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        scalar => vec![scalar],
    };

    let mut out: Vec<String> = Vec::new();
    for item in items {
        let Some(raw) = scalar_string(item) else {
            continue;
        };
        let cleaned = clean(&raw);
        if !cleaned.is_empty() && !out.contains(&cleaned) {
            out.push(cleaned);
        }
    }
    out
}

fn normalize_phone(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
