//! Retry policy for transient lookup failures.

use std::time::Duration;

use enricher_shared::{LookupOutcome, RetrySettings};

/// Exponential backoff with a cap, raised to the server's hint when larger.
/// The hint itself is clamped to `max_retry_after`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// Counted attempts per record, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts.max(1)
    }

    /// Whether an outcome is worth another attempt.
    ///
    /// `AuthRejected` is handled separately (one free retry after
    /// re-authentication) and is not part of the budget.
    pub fn is_retryable(outcome: &LookupOutcome) -> bool {
        matches!(
            outcome,
            LookupOutcome::RateLimited { .. }
                | LookupOutcome::ServerFault { .. }
                | LookupOutcome::TransportFailure { .. }
        )
    }

    /// Delay after the failed attempt with zero-based index `attempt`:
    /// `base * 2^attempt`, capped at `max_delay`, then raised to `hint`
    /// (itself capped at `max_retry_after`).
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.settings.base_delay.checked_mul(factor))
            .map_or(self.settings.max_delay, |d| d.min(self.settings.max_delay));

        match hint.map(|h| h.min(self.settings.max_retry_after)) {
            Some(hint) if hint > computed => hint,
            _ => computed,
        }
    }
}

/// Server-provided retry hint carried by an outcome.
pub fn retry_hint(outcome: &LookupOutcome) -> Option<Duration> {
    match outcome {
        LookupOutcome::RateLimited { retry_after } => *retry_after,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::new(RetrySettings {
            max_attempts: 3,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            max_retry_after: Duration::from_secs(300),
        })
    }

    #[test]
    fn delays_double_until_capped() {
        let p = policy(2_000, 10_000);
        let delays: Vec<u64> = (0..5).map(|k| p.delay_for(k, None).as_millis() as u64).collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 10_000, 10_000]);
    }

    #[test]
    fn huge_attempt_index_saturates_at_cap() {
        let p = policy(2_000, 60_000);
        assert_eq!(p.delay_for(40, None), Duration::from_secs(60));
        assert_eq!(p.delay_for(u32::MAX, None), Duration::from_secs(60));
    }

    #[test]
    fn larger_hint_wins_smaller_is_ignored() {
        let p = policy(2_000, 60_000);
        assert_eq!(p.delay_for(0, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(p.delay_for(2, Some(Duration::from_secs(1))), Duration::from_secs(8));
        // The hint is honored even above the cap.
        assert_eq!(p.delay_for(0, Some(Duration::from_secs(120))), Duration::from_secs(120));
    }

    #[test]
    fn oversized_hint_is_clamped() {
        let p = policy(2_000, 60_000);
        assert_eq!(p.delay_for(0, Some(Duration::from_secs(86_400))), Duration::from_secs(300));
    }

    #[test]
    fn retryable_classes() {
        use LookupOutcome::*;
        assert!(RetryPolicy::is_retryable(&RateLimited { retry_after: None }));
        assert!(RetryPolicy::is_retryable(&ServerFault { status: 503 }));
        assert!(RetryPolicy::is_retryable(&TransportFailure { detail: "x".into() }));
        assert!(!RetryPolicy::is_retryable(&AuthRejected));
        assert!(!RetryPolicy::is_retryable(&Empty));
        assert!(!RetryPolicy::is_retryable(&MalformedPayload { detail: "x".into() }));
        assert!(!RetryPolicy::is_retryable(&Success { matches: vec![] }));
    }

    #[test]
    fn zero_attempts_means_one() {
        let p = RetryPolicy::new(RetrySettings {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retry_after: Duration::ZERO,
        });
        assert_eq!(p.max_attempts(), 1);
    }
}
