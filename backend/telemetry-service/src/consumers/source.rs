//! Broker subscription behind a narrow trait
//!
//! The ingestion loop only needs "give me the next record" and "close".
//! [`KafkaTelemetrySource`] is the production implementation; tests drive the
//! loop with an in-memory channel.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use tracing::info;

use crate::config::KafkaConfig;
use crate::error::{SourceError, StartupError};

/// Owned copy of one broker record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Carried for diagnostics only; keys are not interpreted
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl InboundMessage {
    /// Record with only a payload, used by non-Kafka sources.
    pub fn from_payload(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    fn from_kafka(message: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
        }
    }
}

#[async_trait]
pub trait TelemetrySource: Send {
    /// Wait for the next record. `None` means the source is exhausted.
    async fn recv(&mut self) -> Option<Result<InboundMessage, SourceError>>;

    /// Release the subscription.
    async fn close(&mut self);
}

/// Kafka-backed [`TelemetrySource`]
pub struct KafkaTelemetrySource {
    consumer: StreamConsumer,
    topics: Vec<String>,
}

impl KafkaTelemetrySource {
    /// Create the consumer, verify the brokers answer, and subscribe.
    ///
    /// The metadata handshake blocks, so it runs on the blocking pool. Any
    /// failure here is fatal for the consumer start.
    pub async fn connect(config: &KafkaConfig) -> Result<Self, StartupError> {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::connect_blocking(&config)).await?
    }

    fn connect_blocking(config: &KafkaConfig) -> Result<Self, StartupError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "5000")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()
            .map_err(StartupError::Client)?;

        consumer
            .fetch_metadata(None, config.startup_timeout)
            .map_err(|source| StartupError::BrokerUnreachable {
                brokers: config.brokers.clone(),
                source,
            })?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|source| StartupError::Subscribe {
                topics: config.topics.clone(),
                source,
            })?;

        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            topics = ?config.topics,
            "Telemetry consumer subscribed"
        );

        Ok(Self {
            consumer,
            topics: config.topics.clone(),
        })
    }
}

#[async_trait]
impl TelemetrySource for KafkaTelemetrySource {
    async fn recv(&mut self) -> Option<Result<InboundMessage, SourceError>> {
        let received = self
            .consumer
            .recv()
            .await
            .map(|message| InboundMessage::from_kafka(&message))
            .map_err(SourceError::from);
        Some(received)
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        info!(topics = ?self.topics, "Telemetry consumer unsubscribed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults_to_empty() {
        let tombstone = InboundMessage {
            topic: "planets".to_string(),
            ..InboundMessage::default()
        };
        assert!(tombstone.payload().is_empty());

        let message = InboundMessage::from_payload("planets", b"{}".to_vec());
        assert_eq!(message.payload(), b"{}");
        assert_eq!(message.topic, "planets");
    }
}
