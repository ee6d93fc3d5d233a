pub mod pipeline;
pub mod source;
pub mod telemetry_consumer;

pub use pipeline::{IngestOutcome, TelemetryPipeline};
pub use source::{InboundMessage, KafkaTelemetrySource, TelemetrySource};
pub use telemetry_consumer::{ConsumerState, IngestStats, TelemetryConsumer};
