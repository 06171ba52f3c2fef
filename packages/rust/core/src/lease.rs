//! Credential lease: the one bearer credential the pipeline uses, replaced
//! whole when it nears expiry or the remote side rejects it.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use enricher_shared::{Credential, CredentialAcquirer, EnricherError, Result};

/// Pause between failed acquisition attempts. Doubles each time.
const ACQUIRE_RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct CredentialLease {
    acquirer: Box<dyn CredentialAcquirer>,
    refresh_margin: Duration,
    acquire_attempts: u32,
    held: Option<Held>,
    acquisitions: u64,
}

struct Held {
    credential: Credential,
    /// Refresh margin applied to this credential. Shrunk for tokens whose
    /// whole lifetime is shorter than the configured margin.
    margin: Duration,
}

impl CredentialLease {
    pub fn new(
        acquirer: Box<dyn CredentialAcquirer>,
        refresh_margin: Duration,
        acquire_attempts: u32,
    ) -> Self {
        Self {
            acquirer,
            refresh_margin,
            acquire_attempts: acquire_attempts.max(1),
            held: None,
            acquisitions: 0,
        }
    }

    /// The credential to use for the next request, acquiring a new one when
    /// none is held, the held one is inside its refresh margin, or it was
    /// invalidated.
    pub async fn current(&mut self) -> Result<Credential> {
        if let Some(held) = &self.held {
            if held.credential.is_usable_at(Utc::now(), held.margin) {
                return Ok(held.credential.clone());
            }
            info!(expires_at = %held.credential.expires_at, "credential near expiry, refreshing");
        }

        let credential = self.acquire_with_retry().await?;
        let lifetime = (credential.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let margin = if lifetime <= self.refresh_margin {
            warn!(
                lifetime_secs = lifetime.as_secs(),
                margin_secs = self.refresh_margin.as_secs(),
                "fresh credential expires within the refresh margin"
            );
            lifetime / 2
        } else {
            self.refresh_margin
        };

        self.acquisitions += 1;
        self.held = Some(Held {
            credential: credential.clone(),
            margin,
        });
        Ok(credential)
    }

    /// Drop the held credential so the next [`current`](Self::current)
    /// re-acquires regardless of its expiry.
    pub fn invalidate(&mut self) {
        if self.held.take().is_some() {
            info!("credential invalidated");
        }
    }

    /// Successful acquisitions so far (the first one included).
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    async fn acquire_with_retry(&self) -> Result<Credential> {
        let mut delay = ACQUIRE_RETRY_DELAY;
        let mut last_error = String::new();

        for attempt in 1..=self.acquire_attempts {
            match self.acquirer.acquire().await {
                Ok(credential) if credential.is_usable_at(Utc::now(), Duration::ZERO) => {
                    debug!(attempt, expires_at = %credential.expires_at, "credential acquired");
                    return Ok(credential);
                }
                Ok(credential) => {
                    warn!(
                        attempt,
                        max = self.acquire_attempts,
                        expires_at = %credential.expires_at,
                        "acquired credential is already expired"
                    );
                    last_error = format!("credential expired at {}", credential.expires_at);
                }
                Err(e) => {
                    warn!(attempt, max = self.acquire_attempts, error = %e, "credential acquisition failed");
                    last_error = e.to_string();
                }
            }
            if attempt < self.acquire_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(EnricherError::CredentialUnavailable(format!(
            "gave up after {} attempt(s): {last_error}",
            self.acquire_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    /// Issues `tok-1`, `tok-2`, ... valid for `ttl`, after failing `failures` times.
    struct CountingAcquirer {
        calls: Arc<AtomicU32>,
        failures: u32,
        ttl: chrono::Duration,
    }

    #[async_trait]
    impl CredentialAcquirer for CountingAcquirer {
        async fn acquire(&self) -> Result<Credential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(EnricherError::CredentialUnavailable(format!("attempt {n} failed")));
            }
            let now = Utc::now();
            Ok(Credential {
                token: format!("tok-{}", n - self.failures),
                issued_at: now,
                expires_at: now + self.ttl,
            })
        }
    }

    fn lease(failures: u32, ttl: chrono::Duration, attempts: u32) -> (CredentialLease, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let acquirer = CountingAcquirer {
            calls: calls.clone(),
            failures,
            ttl,
        };
        (
            CredentialLease::new(Box::new(acquirer), Duration::from_secs(300), attempts),
            calls,
        )
    }

    #[tokio::test]
    async fn reuses_credential_while_valid() {
        let (mut lease, calls) = lease(0, chrono::Duration::hours(1), 3);
        let a = lease.current().await.unwrap();
        let b = lease.current().await.unwrap();
        assert_eq!(a.token, "tok-1");
        assert_eq!(b.token, "tok-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(lease.acquisitions(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reacquisition() {
        let (mut lease, _) = lease(0, chrono::Duration::hours(1), 3);
        lease.current().await.unwrap();
        lease.invalidate();
        let fresh = lease.current().await.unwrap();
        assert_eq!(fresh.token, "tok-2");
        assert_eq!(lease.acquisitions(), 2);
    }

    #[tokio::test]
    async fn short_lived_token_is_not_reacquired_every_call() {
        // 60s lifetime against a 300s margin: usable until half its lifetime.
        let (mut lease, calls) = lease(0, chrono::Duration::seconds(60), 3);
        lease.current().await.unwrap();
        lease.current().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_expired_token_is_unavailable() {
        let (mut lease, calls) = lease(0, chrono::Duration::hours(-1), 3);
        let err = lease.current().await.unwrap_err();
        assert!(matches!(err, EnricherError::CredentialUnavailable(_)));
        assert!(err.to_string().contains("expired"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(lease.acquisitions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_acquisition_failure_is_retried() {
        let (mut lease, calls) = lease(2, chrono::Duration::hours(1), 3);
        let cred = lease.current().await.unwrap();
        assert_eq!(cred.token, "tok-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_acquisition_is_unavailable() {
        let (mut lease, calls) = lease(u32::MAX, chrono::Duration::hours(1), 3);
        let err = lease.current().await.unwrap_err();
        assert!(matches!(err, EnricherError::CredentialUnavailable(_)));
        assert!(err.to_string().contains("3 attempt(s)"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(lease.acquisitions(), 0);
    }
}
