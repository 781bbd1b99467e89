//! Configuration loading for the ingestion engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `INGEST_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::domain::{Provider, UnknownProvider};

const ENV_PREFIX: &str = "INGEST_";

/// Application configuration derived from `INGEST_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Providers registered at startup; all known providers when unset.
    #[serde(default = "default_enabled_providers")]
    pub enabled_providers: Vec<Provider>,
    #[serde(default)]
    pub google_mail_enabled: bool,
    /// Directory holding `microsoft.json` / `google.json` snapshots. Built-in
    /// sample data is served when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixtures_dir: Option<PathBuf>,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Tuning for a single tenant sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Maximum number of users whose mail is fetched concurrently
    ///
    /// Environment variable: `INGEST_SYNC_EMAIL_CONCURRENCY`
    #[serde(default = "default_email_concurrency")]
    pub email_concurrency: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

/// Retry policy for provider calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryPolicy {
    /// Total attempts per call, first try included (default: 3)
    ///
    /// Environment variable: `INGEST_RETRY_MAX_ATTEMPTS`
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds (default: 200)
    ///
    /// Subsequent retries use exponential backoff: base_ms * 2^attempt.
    ///
    /// Environment variable: `INGEST_RETRY_BASE_MS`
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,

    /// Upper bound for a single backoff in milliseconds (default: 10000)
    ///
    /// Environment variable: `INGEST_RETRY_MAX_MS`
    #[serde(default = "default_retry_max_ms")]
    pub max_ms: u64,

    /// Jitter factor (default: 0.1, range: 0.0-1.0)
    ///
    /// Environment variable: `INGEST_RETRY_JITTER_FACTOR`
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            enabled_providers: default_enabled_providers(),
            google_mail_enabled: false,
            fixtures_dir: None,
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            email_concurrency: default_email_concurrency(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_ms: default_retry_base_ms(),
            max_ms: default_retry_max_ms(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries; useful where latency matters more than success.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_ms: 0,
            max_ms: 0,
            jitter_factor: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > 10 {
            return Err(ConfigError::InvalidRetryAttempts {
                value: self.max_attempts,
            });
        }
        if self.base_ms > self.max_ms {
            return Err(ConfigError::InvalidRetryBounds {
                base: self.base_ms,
                max: self.max_ms,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidRetryJitter {
                value: self.jitter_factor,
            });
        }
        Ok(())
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.email_concurrency == 0 || self.email_concurrency > 64 {
            return Err(ConfigError::InvalidEmailConcurrency {
                value: self.email_concurrency,
            });
        }
        self.retry.validate()
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (database credentials are masked).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        config.database_url = redact_url_credentials(&config.database_url);
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if self.db_max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections {
                value: self.db_max_connections,
            });
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }
        if self.enabled_providers.is_empty() {
            return Err(ConfigError::NoProvidersEnabled);
        }

        self.sync.validate()?;

        Ok(())
    }
}

const REDACTED: &str = "REDACTED";

/// Masks the userinfo password and any `password` query parameter of a
/// connection URL. Unparseable input is masked whole.
fn redact_url_credentials(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return REDACTED.to_string();
    };

    let mut changed = false;
    if url.password().is_some() {
        if url.set_password(Some(REDACTED)).is_err() {
            return REDACTED.to_string();
        }
        changed = true;
    }

    if url
        .query_pairs()
        .any(|(key, _)| key.eq_ignore_ascii_case("password"))
    {
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(key, value)| {
                if key.eq_ignore_ascii_case("password") {
                    (key.into_owned(), REDACTED.to_string())
                } else {
                    (key.into_owned(), value.into_owned())
                }
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        changed = true;
    }

    if changed { url.into() } else { raw.to_string() }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://ingest.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_enabled_providers() -> Vec<Provider> {
    Provider::ALL.to_vec()
}

fn default_email_concurrency() -> usize {
    4
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_retry_max_ms() -> u64 {
    10_000
}

fn default_retry_jitter_factor() -> f64 {
    0.1
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("database url is missing; set INGEST_DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("database max connections must be positive, got {value}")]
    InvalidMaxConnections { value: u32 },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("invalid INGEST_ENABLED_PROVIDERS entry: {0}")]
    InvalidProvider(#[from] UnknownProvider),
    #[error("at least one provider must be enabled")]
    NoProvidersEnabled,
    #[error("invalid boolean for {key}: '{value}'")]
    InvalidBool { key: String, value: String },
    #[error("email concurrency must be between 1 and 64, got {value}")]
    InvalidEmailConcurrency { value: usize },
    #[error("retry max attempts must be between 1 and 10, got {value}")]
    InvalidRetryAttempts { value: u32 },
    #[error("retry base ms ({base}) cannot be greater than max ms ({max})")]
    InvalidRetryBounds { base: u64, max: u64 },
    #[error("retry jitter factor must be between 0.0 and 1.0, got {value}")]
    InvalidRetryJitter { value: f64 },
}

/// Loads configuration using layered `.env` files and `INGEST_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads and validates configuration.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .map(|v| v.trim().to_ascii_lowercase())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let enabled_providers = match layered.remove("ENABLED_PROVIDERS") {
            Some(list) if !list.trim().is_empty() => {
                let mut providers = Vec::new();
                for slug in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    let provider: Provider = slug.parse()?;
                    if !providers.contains(&provider) {
                        providers.push(provider);
                    }
                }
                providers
            }
            _ => default_enabled_providers(),
        };

        let google_mail_enabled = match layered.remove("GOOGLE_MAIL_ENABLED") {
            Some(value) => parse_bool("INGEST_GOOGLE_MAIL_ENABLED", &value)?,
            None => false,
        };
        let fixtures_dir = layered
            .remove("FIXTURES_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let email_concurrency = layered
            .remove("SYNC_EMAIL_CONCURRENCY")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_email_concurrency);

        let retry = RetryPolicy {
            max_attempts: layered
                .remove("RETRY_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_retry_max_attempts),
            base_ms: layered
                .remove("RETRY_BASE_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_retry_base_ms),
            max_ms: layered
                .remove("RETRY_MAX_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_retry_max_ms),
            jitter_factor: layered
                .remove("RETRY_JITTER_FACTOR")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_retry_jitter_factor),
        };

        let config = AppConfig {
            profile,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            enabled_providers,
            google_mail_enabled,
            fixtures_dir,
            sync: SyncConfig {
                email_concurrency,
                retry,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("INGEST_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}
