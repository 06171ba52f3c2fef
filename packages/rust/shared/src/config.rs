//! Application configuration for the enricher.
//!
//! User config lives at `~/.enricher/enricher.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EnricherError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "enricher.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".enricher";

// ---------------------------------------------------------------------------
// Config structs (matching enricher.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote directory API.
    #[serde(default)]
    pub api: ApiConfig,

    /// Credential acquisition and refresh.
    #[serde(default)]
    pub credential: CredentialConfig,

    /// Retry/backoff policy for transient lookup failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Randomized delay between consecutive lookups.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Input, output and checkpoint locations.
    #[serde(default)]
    pub files: FilesConfig,

    /// Input/output CSV dialect.
    #[serde(default)]
    pub csv: CsvConfig,

    /// Progress logging and checkpoint cadence.
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_search_endpoint")]
    pub search_endpoint: String,

    /// Maximum results requested per lookup.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_origin")]
    pub origin: String,

    #[serde(default = "default_referer")]
    pub referer: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_endpoint: default_search_endpoint(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            origin: default_origin(),
            referer: default_referer(),
        }
    }
}

fn default_base_url() -> String {
    "https://apiresteannuairemiddleware.avocatparis.org".into()
}
fn default_search_endpoint() -> String {
    "/api/GetCombinedAvocatStructureFluxDatas".into()
}
fn default_page_size() -> u32 {
    30
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_origin() -> String {
    "https://www.avocatparis.org".into()
}
fn default_referer() -> String {
    "https://www.avocatparis.org/".into()
}

/// `[credential]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// External program (and arguments) that prints a bearer token on stdout.
    /// When unset, the token is read from `token_env`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Environment variable holding the token when no command is configured.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Refresh this many seconds before the token expires.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    /// Acquisition attempts before the credential is declared unavailable.
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,

    /// Validity assumed for tokens that carry no `exp` claim.
    #[serde(default = "default_fallback_ttl")]
    pub fallback_ttl_secs: u64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            token_env: default_token_env(),
            refresh_margin_secs: default_refresh_margin(),
            acquire_attempts: default_acquire_attempts(),
            fallback_ttl_secs: default_fallback_ttl(),
        }
    }
}

fn default_token_env() -> String {
    "ENRICHER_TOKEN".into()
}
fn default_refresh_margin() -> u64 {
    300
}
fn default_acquire_attempts() -> u32 {
    3
}
fn default_fallback_ttl() -> u64 {
    1800
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per record for transient failures (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Ceiling for a server `Retry-After` hint.
    #[serde(default = "default_max_retry_after")]
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_retry_after_secs: default_max_retry_after(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    2_000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_max_retry_after() -> u64 {
    300
}

/// `[pacing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_pacing_min")]
    pub min_delay_ms: u64,

    #[serde(default = "default_pacing_max")]
    pub max_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_pacing_min(),
            max_delay_ms: default_pacing_max(),
        }
    }
}

fn default_pacing_min() -> u64 {
    500
}
fn default_pacing_max() -> u64 {
    2_000
}

/// `[files]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    #[serde(default = "default_input")]
    pub input: PathBuf,

    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
            checkpoint: default_checkpoint(),
        }
    }
}

fn default_input() -> PathBuf {
    "avocats.csv".into()
}
fn default_output() -> PathBuf {
    "avocats_enriched.csv".into()
}
fn default_checkpoint() -> PathBuf {
    "checkpoint.json".into()
}

/// Text encoding of the input and output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// ISO-8859-1.
    #[default]
    Latin1,
    Utf8,
}

/// `[csv]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default)]
    pub encoding: TextEncoding,

    /// Column holding the stable record id.
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Columns joined with a space to form the query key.
    #[serde(default = "default_query_columns")]
    pub query_columns: Vec<String>,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            encoding: TextEncoding::default(),
            id_column: default_id_column(),
            query_columns: default_query_columns(),
        }
    }
}

fn default_delimiter() -> char {
    ';'
}
fn default_id_column() -> String {
    "ID_AVO".into()
}
fn default_query_columns() -> Vec<String> {
    vec!["PRENOM1".into(), "NOM".into()]
}

/// `[progress]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Log a progress summary every N committed records.
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,

    /// Persist the checkpoint every N committed records.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            log_interval: default_log_interval(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

fn default_log_interval() -> u64 {
    10
}
fn default_checkpoint_interval() -> u64 {
    100
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pacing.min_delay_ms > self.pacing.max_delay_ms {
            return Err(EnricherError::validation(format!(
                "pacing min {}ms exceeds max {}ms",
                self.pacing.min_delay_ms, self.pacing.max_delay_ms
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(EnricherError::validation("retry.max_attempts must be at least 1"));
        }
        if self.credential.acquire_attempts == 0 {
            return Err(EnricherError::validation(
                "credential.acquire_attempts must be at least 1",
            ));
        }
        if self.progress.checkpoint_interval == 0 {
            return Err(EnricherError::validation(
                "progress.checkpoint_interval must be at least 1",
            ));
        }
        if !self.csv.delimiter.is_ascii() || matches!(self.csv.delimiter, '"' | '\n' | '\r') {
            return Err(EnricherError::validation(format!(
                "csv.delimiter must be a single ASCII character other than a quote or line break, got {:?}",
                self.csv.delimiter
            )));
        }
        if self.csv.query_columns.is_empty() {
            return Err(EnricherError::validation("csv.query_columns must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Retry/backoff knobs in runtime units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retry_after: Duration,
}

impl From<&RetryConfig> for RetrySettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_retry_after: Duration::from_secs(config.max_retry_after_secs),
        }
    }
}

/// Runtime pipeline configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub retry: RetrySettings,
    pub pacing_min: Duration,
    pub pacing_max: Duration,
    pub request_timeout: Duration,
    pub refresh_margin: Duration,
    pub acquire_attempts: u32,
    pub checkpoint_interval: u64,
    pub log_interval: u64,
    /// Stop after this many records committed in the current session.
    pub limit: Option<u64>,
}

impl From<&AppConfig> for RunSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            retry: RetrySettings::from(&config.retry),
            pacing_min: Duration::from_millis(config.pacing.min_delay_ms),
            pacing_max: Duration::from_millis(config.pacing.max_delay_ms),
            request_timeout: Duration::from_secs(config.api.timeout_secs),
            refresh_margin: Duration::from_secs(config.credential.refresh_margin_secs),
            acquire_attempts: config.credential.acquire_attempts,
            checkpoint_interval: config.progress.checkpoint_interval,
            log_interval: config.progress.log_interval,
            limit: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.enricher/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| EnricherError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.enricher/enricher.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path and validate it.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EnricherError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        EnricherError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EnricherError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| EnricherError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EnricherError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("search_endpoint"));
        assert!(toml_str.contains("ENRICHER_TOKEN"));
        assert!(toml_str.contains("latin1"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retry.max_attempts, 3);
        assert_eq!(parsed.csv.delimiter, ';');
        assert_eq!(parsed.csv.query_columns, vec!["PRENOM1", "NOM"]);
        parsed.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[credential]
command = ["node", "scripts/extract-token.js"]

[pacing]
min_delay_ms = 0
max_delay_ms = 0

[csv]
encoding = "utf8"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.credential.command.len(), 2);
        assert_eq!(config.credential.refresh_margin_secs, 300);
        assert_eq!(config.csv.encoding, TextEncoding::Utf8);
        assert_eq!(config.files.checkpoint, PathBuf::from("checkpoint.json"));
        config.validate().expect("valid");
    }

    #[test]
    fn validation_rejects_inverted_pacing() {
        let mut config = AppConfig::default();
        config.pacing.min_delay_ms = 3_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pacing min"));
    }

    #[test]
    fn validation_rejects_bad_delimiter() {
        let mut config = AppConfig::default();
        config.csv.delimiter = '"';
        assert!(config.validate().is_err());
        config.csv.delimiter = 'é';
        assert!(config.validate().is_err());
        for line_break in ['\n', '\r'] {
            config.csv.delimiter = line_break;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("line break"));
        }
        config.csv.delimiter = '\t';
        config.validate().expect("tab is a valid delimiter");
    }

    #[test]
    fn run_settings_from_app_config() {
        let app = AppConfig::default();
        let run = RunSettings::from(&app);
        assert_eq!(run.retry.base_delay, Duration::from_secs(2));
        assert_eq!(run.retry.max_delay, Duration::from_secs(60));
        assert_eq!(run.retry.max_retry_after, Duration::from_secs(300));
        assert_eq!(run.pacing_min, Duration::from_millis(500));
        assert_eq!(run.refresh_margin, Duration::from_secs(300));
        assert_eq!(run.checkpoint_interval, 100);
        assert_eq!(run.limit, None);
    }

    #[test]
    fn load_config_from_rejects_invalid_file() {
        let dir = std::env::temp_dir().join(format!("enricher-config-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("enricher.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 0\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
