//! Error taxonomy of the ingestion pipeline
//!
//! Everything except [`StartupError`] is a per-message failure: it is logged at
//! the consumer boundary and never stops the stream.

use crate::codec::DecodeError;
use crate::models::{EntityKind, UnknownEntityKind};
use rdkafka::error::KafkaError;
use std::time::Duration;
use thiserror::Error;

/// Storage-layer failure (connectivity, constraint violation, timeout)
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl PersistenceError {
    /// PostgreSQL unique violation (SQLSTATE 23505)
    pub fn is_unique_violation(&self) -> bool {
        match self {
            PersistenceError::Database(sqlx_err) => sqlx_err
                .as_database_error()
                .map(|db_err| db_err.code().as_deref() == Some("23505"))
                .unwrap_or(false),
            PersistenceError::Timeout { .. } => false,
        }
    }

    /// Connectivity problems that may clear up on their own
    pub fn is_transient(&self) -> bool {
        match self {
            PersistenceError::Database(sqlx_err) => matches!(
                sqlx_err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            PersistenceError::Timeout { .. } => true,
        }
    }
}

/// Failure mapping `(kind, name)` to an entity id
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no {kind} named {name:?}")]
    EntityNotFound { kind: EntityKind, name: String },

    /// A concurrent insert won the race for this name. The resolver answers it
    /// with a re-read; it only escapes if the winning row vanished in between.
    #[error("concurrent creation of {kind} {name:?} could not be reconciled")]
    ConflictOnCreate { kind: EntityKind, name: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Why a single message was discarded
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    UnknownEntityKind(#[from] UnknownEntityKind),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("failed to append position sample: {0}")]
    Persistence(#[source] PersistenceError),
}

impl IngestError {
    /// Stable label used for metrics and log fields.
    pub fn outcome(&self) -> &'static str {
        match self {
            IngestError::Decode(_) => "decode_error",
            IngestError::UnknownEntityKind(_) => "unknown_kind",
            IngestError::Resolve(ResolveError::EntityNotFound { .. }) => "entity_not_found",
            IngestError::Resolve(_) | IngestError::Persistence(_) => "persistence_error",
        }
    }
}

/// Broker-side failure while waiting for the next record
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("broker receive failed: {0}")]
    Broker(#[from] KafkaError),
}

/// Fatal failure while bringing the consumer up
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to create Kafka consumer: {0}")]
    Client(#[source] KafkaError),

    #[error("Kafka brokers {brokers} unreachable: {source}")]
    BrokerUnreachable {
        brokers: String,
        #[source]
        source: KafkaError,
    },

    #[error("failed to subscribe to topics {topics:?}: {source}")]
    Subscribe {
        topics: Vec<String>,
        #[source]
        source: KafkaError,
    },

    #[error("consumer is already {0}")]
    AlreadyRunning(crate::consumers::ConsumerState),

    #[error("startup task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
