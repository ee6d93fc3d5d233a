//! Telemetry ingestion service
//!
//! Consumes planet and ship position telemetry from Kafka, resolves each
//! message to a tracked entity and appends the position to PostgreSQL.

pub mod codec;
pub mod config;
pub mod consumers;
pub mod error;
pub mod metrics;
pub mod models;
pub mod repository;

pub use config::Config;
pub use consumers::{ConsumerState, IngestStats, TelemetryConsumer, TelemetryPipeline};
pub use error::{IngestError, PersistenceError, ResolveError, StartupError};
pub use models::{Entity, EntityKind, PositionSample};

/// Label used for pool metrics and log fields
pub const SERVICE_NAME: &str = "telemetry-service";
