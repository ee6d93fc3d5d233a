//! Environment variable parsing helpers shared by service configuration.
//!
//! Missing variables fall back to defaults; malformed values are reported
//! instead of being silently replaced, so a typo in a deployment manifest
//! surfaces at startup.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Failure reading a configuration variable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    #[error("environment variable {0} is not set")]
    Missing(String),

    #[error("environment variable {key} has invalid value {value:?}")]
    Invalid { key: String, value: String },
}

/// Read `key` and parse it, returning `default` when the variable is unset or blank.
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> Result<T, EnvError> {
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|_| EnvError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Read `key` and parse it; the variable must be present.
pub fn parse_env_required<T: FromStr>(key: &str) -> Result<T, EnvError> {
    let raw = std::env::var(key).map_err(|_| EnvError::Missing(key.to_string()))?;
    raw.trim().parse().map_err(|_| EnvError::Invalid {
        key: key.to_string(),
        value: raw,
    })
}

/// Read a millisecond count as a [`Duration`].
pub fn parse_env_millis(key: &str, default_ms: u64) -> Result<Duration, EnvError> {
    parse_env_with_default(key, default_ms).map(Duration::from_millis)
}

/// Read a comma-separated list, trimming entries and dropping empty ones.
pub fn parse_env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => default.iter().map(|item| item.to_string()).collect(),
    }
}
