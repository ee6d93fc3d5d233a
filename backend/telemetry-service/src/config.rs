use db_pool::env_utils::{parse_env_list, parse_env_millis, parse_env_with_default};
use db_pool::{DbConfig, EnvError};
use std::time::Duration;
use thiserror::Error;

use crate::SERVICE_NAME;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub kafka: KafkaConfig,
    pub ingest: IngestConfig,
}

/// Broker connection and subscription settings
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    pub group_id: String,
    /// Topics consumed by the single ingestion task
    pub topics: Vec<String>,
    pub auto_offset_reset: String,
    pub session_timeout_ms: u64,
    /// Deadline for the metadata handshake at startup
    pub startup_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "telemetry-ingest".to_string(),
            topics: vec!["planets".to_string(), "ships".to_string()],
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30_000,
            startup_timeout: Duration::from_secs(10),
        }
    }
}

impl KafkaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let default_topics: Vec<&str> = defaults.topics.iter().map(String::as_str).collect();

        Ok(Self {
            brokers: brokers_from_env(&defaults.brokers)?,
            group_id: parse_env_with_default("KAFKA_GROUP_ID", defaults.group_id.clone())?,
            topics: parse_env_list("KAFKA_TELEMETRY_TOPICS", &default_topics),
            auto_offset_reset: parse_env_with_default(
                "KAFKA_AUTO_OFFSET_RESET",
                defaults.auto_offset_reset.clone(),
            )?,
            session_timeout_ms: parse_env_with_default(
                "KAFKA_SESSION_TIMEOUT_MS",
                defaults.session_timeout_ms,
            )?,
            startup_timeout: parse_env_millis("KAFKA_STARTUP_TIMEOUT_MS", 10_000)?,
        })
    }
}

/// `KAFKA_BROKERS` wins; otherwise `KAFKA_HOST`/`KAFKA_PORT` are combined.
fn brokers_from_env(default: &str) -> Result<String, ConfigError> {
    if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
        if !brokers.trim().is_empty() {
            return Ok(brokers.trim().to_string());
        }
    }

    match std::env::var("KAFKA_HOST") {
        Ok(host) if !host.trim().is_empty() => {
            let port: u16 = parse_env_with_default("KAFKA_PORT", 9092)?;
            Ok(format!("{}:{}", host.trim(), port))
        }
        _ => Ok(default.to_string()),
    }
}

/// Per-message pipeline timing
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Broker read timeout; expiry only means "no message this cycle"
    pub poll_timeout: Duration,
    /// Upper bound for each resolver/store call
    pub store_timeout: Duration,
    /// Pause after a broker receive error
    pub error_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            store_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            poll_timeout: parse_env_millis("INGEST_POLL_TIMEOUT_MS", 1_000)?,
            store_timeout: parse_env_millis("INGEST_STORE_TIMEOUT_MS", 5_000)?,
            error_backoff: parse_env_millis("INGEST_ERROR_BACKOFF_MS", 1_000)?,
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            database: DbConfig::from_env(SERVICE_NAME)?,
            kafka: KafkaConfig::from_env()?,
            ingest: IngestConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.topics.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one telemetry topic is required".to_string(),
            ));
        }
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Invalid("Kafka brokers must be set".to_string()));
        }
        if self.ingest.poll_timeout.is_zero() || self.ingest.store_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "ingest timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
