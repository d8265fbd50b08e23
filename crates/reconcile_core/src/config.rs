//! Runtime configuration.
//!
//! # Responsibility
//! - Collect database, logging and retry settings from the environment
//!   (optionally seeded from a `.env` file).
//!
//! # Invariants
//! - Unset variables fall back to documented defaults.
//! - Set-but-invalid variables are errors, never silently defaulted.
//! - `max_attempts >= 1`.

use crate::logging::default_log_level;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DB_PATH: &str = "RECONCILE_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "RECONCILE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "RECONCILE_LOG_DIR";
pub const ENV_BUSY_TIMEOUT_MS: &str = "RECONCILE_BUSY_TIMEOUT_MS";
pub const ENV_MAX_ATTEMPTS: &str = "RECONCILE_MAX_ATTEMPTS";
pub const ENV_RETRY_BACKOFF_MS: &str = "RECONCILE_RETRY_BACKOFF_MS";
pub const ENV_OVERALL_TIMEOUT_MS: &str = "RECONCILE_OVERALL_TIMEOUT_MS";

const DEFAULT_DB_PATH: &str = "reconcile.sqlite3";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 50;
const DEFAULT_OVERALL_TIMEOUT_MS: u64 = 15_000;

/// Configuration loading failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidNumber { key: &'static str, value: String },
    ZeroAttempts,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumber { key, value } => {
                write!(f, "`{key}` must be a non-negative integer, got `{value}`")
            }
            Self::ZeroAttempts => write!(f, "`{ENV_MAX_ATTEMPTS}` must be at least 1"),
        }
    }
}

impl Error for ConfigError {}

/// Bounded retry policy for one resolution unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Sleep before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
    /// No new attempt starts once this much time has elapsed.
    pub overall_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            overall_timeout: Duration::from_millis(DEFAULT_OVERALL_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            log_level: default_log_level().to_string(),
            log_dir: None,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl ReconcileConfig {
    /// Loads `.env` when present, then reads process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is the normal case.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let max_attempts = match value(ENV_MAX_ATTEMPTS) {
            Some(raw) => parse_number::<u32>(ENV_MAX_ATTEMPTS, &raw)?,
            None => defaults.retry.max_attempts,
        };
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        Ok(Self {
            db_path: value(ENV_DB_PATH).map_or(defaults.db_path, PathBuf::from),
            log_level: value(ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            log_dir: value(ENV_LOG_DIR).map(PathBuf::from),
            busy_timeout: millis_or(
                value(ENV_BUSY_TIMEOUT_MS),
                ENV_BUSY_TIMEOUT_MS,
                defaults.busy_timeout,
            )?,
            retry: RetryPolicy {
                max_attempts,
                backoff: millis_or(
                    value(ENV_RETRY_BACKOFF_MS),
                    ENV_RETRY_BACKOFF_MS,
                    defaults.retry.backoff,
                )?,
                overall_timeout: millis_or(
                    value(ENV_OVERALL_TIMEOUT_MS),
                    ENV_OVERALL_TIMEOUT_MS,
                    defaults.retry.overall_timeout,
                )?,
            },
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}

fn millis_or(
    raw: Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(raw) => parse_number::<u64>(key, &raw).map(Duration::from_millis),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ReconcileConfig, RetryPolicy, ENV_MAX_ATTEMPTS};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ReconcileConfig, ConfigError> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ReconcileConfig::from_lookup(|key| values.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config_from(&[]).unwrap(), ReconcileConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("RECONCILE_DB_PATH", "/tmp/contacts.db"),
            ("RECONCILE_LOG_DIR", "/tmp/logs"),
            ("RECONCILE_BUSY_TIMEOUT_MS", "250"),
            ("RECONCILE_MAX_ATTEMPTS", "5"),
            ("RECONCILE_RETRY_BACKOFF_MS", " 10 "),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/contacts.db"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/logs")));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff, Duration::from_millis(10));
        assert_eq!(
            config.retry.overall_timeout,
            RetryPolicy::default().overall_timeout
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = config_from(&[("RECONCILE_BUSY_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));

        let err = config_from(&[(ENV_MAX_ATTEMPTS, "0")]).unwrap_err();
        assert_eq!(err, ConfigError::ZeroAttempts);
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy {
            backoff: Duration::from_millis(20),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(3), Duration::from_millis(60));
    }
}
