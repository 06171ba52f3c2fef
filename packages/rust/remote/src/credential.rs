//! Credential acquisition.
//!
//! Tokens are minted outside the core: either a configured
//! program prints it (e.g. a browser automation script that intercepts the
//! site's own API calls), or it is read from an environment variable. Expiry
//! comes from the JWT `exp` claim when the token is a JWT.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{info, instrument, warn};

use enricher_shared::{Credential, CredentialAcquirer, CredentialConfig, EnricherError, Result};

/// Upper bound for one run of the token command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Decode the `exp` claim of a JWT without verifying its signature.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?;
    let secs = exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp(secs, 0)
}

/// Wrap a raw token, taking expiry from the token itself when possible.
pub fn credential_from_token(token: &str, fallback_ttl: Duration) -> Result<Credential> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
    if token.is_empty() {
        return Err(EnricherError::CredentialUnavailable("empty token".into()));
    }

    let issued_at = Utc::now();
    let expires_at = match token_expiry(token) {
        Some(exp) => exp,
        None => {
            warn!(
                fallback_ttl_secs = fallback_ttl.as_secs(),
                "token carries no exp claim, assuming fallback validity"
            );
            let ttl = chrono::Duration::from_std(fallback_ttl)
                .map_err(|e| EnricherError::config(format!("fallback ttl out of range: {e}")))?;
            issued_at + ttl
        }
    };

    Ok(Credential {
        token: token.to_string(),
        issued_at,
        expires_at,
    })
}

/// Reads the token from an environment variable at every acquisition, so an
/// operator can rotate it without restarting.
pub struct EnvAcquirer {
    var: String,
    fallback_ttl: Duration,
}

impl EnvAcquirer {
    pub fn new(var: impl Into<String>, fallback_ttl: Duration) -> Self {
        Self {
            var: var.into(),
            fallback_ttl,
        }
    }
}

#[async_trait]
impl CredentialAcquirer for EnvAcquirer {
    async fn acquire(&self) -> Result<Credential> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => {
                let credential = credential_from_token(&token, self.fallback_ttl)?;
                info!(var = %self.var, expires_at = %credential.expires_at, "token read from environment");
                Ok(credential)
            }
            _ => Err(EnricherError::CredentialUnavailable(format!(
                "no token found. Set the {} environment variable or configure credential.command",
                self.var
            ))),
        }
    }
}

/// Runs an external program and takes the first non-empty stdout line as token.
pub struct CommandAcquirer {
    program: String,
    args: Vec<String>,
    fallback_ttl: Duration,
}

impl CommandAcquirer {
    pub fn new(program: impl Into<String>, args: Vec<String>, fallback_ttl: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            fallback_ttl,
        }
    }
}

#[async_trait]
impl CredentialAcquirer for CommandAcquirer {
    #[instrument(skip_all, fields(program = %self.program))]
    async fn acquire(&self) -> Result<Credential> {
        info!("running token command");

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EnricherError::CredentialUnavailable(format!(
                    "failed to spawn token command `{}`: {e}",
                    self.program
                ))
            })?;

        let output = tokio::time::timeout(COMMAND_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| {
                EnricherError::CredentialUnavailable(format!(
                    "token command timed out after {}s",
                    COMMAND_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| EnricherError::CredentialUnavailable(format!("token command: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(200).collect();
            return Err(EnricherError::CredentialUnavailable(format!(
                "token command exited with {}: {stderr}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| {
                EnricherError::CredentialUnavailable("token command printed nothing".into())
            })?;

        let credential = credential_from_token(token, self.fallback_ttl)?;
        info!(expires_at = %credential.expires_at, "token acquired");
        Ok(credential)
    }
}

/// Pick the acquisition strategy from the `[credential]` config section.
pub fn acquirer_from_config(config: &CredentialConfig) -> Box<dyn CredentialAcquirer> {
    let fallback_ttl = Duration::from_secs(config.fallback_ttl_secs);
    match config.command.split_first() {
        Some((program, args)) => Box::new(CommandAcquirer::new(
            program.clone(),
            args.to_vec(),
            fallback_ttl,
        )),
        None => Box::new(EnvAcquirer::new(config.token_env.clone(), fallback_ttl)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_claims(claims: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims);
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    #[test]
    fn decodes_exp_claim() {
        let token = jwt_with_claims(r#"{"sub":"web","exp":1893456000}"#);
        let exp = token_expiry(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_893_456_000);
    }

    #[test]
    fn non_jwt_has_no_expiry() {
        assert!(token_expiry("opaque-token").is_none());
        assert!(token_expiry("a.b.c.d").is_none());
        assert!(token_expiry(&jwt_with_claims(r#"{"sub":"web"}"#)).is_none());
    }

    #[test]
    fn credential_uses_exp_or_fallback() {
        let token = jwt_with_claims(r#"{"exp":1893456000}"#);
        let cred = credential_from_token(&format!("Bearer {token}\n"), Duration::from_secs(60))
            .unwrap();
        assert_eq!(cred.token, token);
        assert_eq!(cred.expires_at.timestamp(), 1_893_456_000);

        let cred = credential_from_token("opaque", Duration::from_secs(60)).unwrap();
        let ttl = cred.expires_at - cred.issued_at;
        assert_eq!(ttl.num_seconds(), 60);

        assert!(credential_from_token("   ", Duration::from_secs(60)).is_err());
    }

    #[tokio::test]
    async fn env_acquirer_missing_var_is_unavailable() {
        let acquirer = EnvAcquirer::new("ENRICHER_TEST_NONEXISTENT_TOKEN_9876", Duration::ZERO);
        let err = acquirer.acquire().await.unwrap_err();
        assert!(matches!(err, EnricherError::CredentialUnavailable(_)));
        assert!(err.to_string().contains("ENRICHER_TEST_NONEXISTENT_TOKEN_9876"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_acquirer_reads_first_line() {
        let token = jwt_with_claims(r#"{"exp":1893456000}"#);
        let acquirer = CommandAcquirer::new(
            "sh",
            vec!["-c".into(), format!("echo; echo '{token}'; echo trailing")],
            Duration::from_secs(60),
        );
        let cred = acquirer.acquire().await.unwrap();
        assert_eq!(cred.token, token);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_acquirer_failure_is_unavailable() {
        let acquirer = CommandAcquirer::new(
            "sh",
            vec!["-c".into(), "echo boom >&2; exit 3".into()],
            Duration::from_secs(60),
        );
        let err = acquirer.acquire().await.unwrap_err();
        assert!(matches!(err, EnricherError::CredentialUnavailable(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn config_selects_strategy() {
        let mut config = CredentialConfig::default();
        // Env-based by default; no way to inspect the box, but building must not panic.
        let _ = acquirer_from_config(&config);
        config.command = vec!["node".into(), "token.js".into()];
        let _ = acquirer_from_config(&config);
    }
}
