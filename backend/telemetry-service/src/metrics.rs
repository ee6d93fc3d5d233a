//! Prometheus metrics for telemetry ingestion

use crate::consumers::ConsumerState;
use crate::models::EntityKind;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};

lazy_static::lazy_static! {
    /// Processed messages by outcome (stored, decode_error, unknown_kind, ...)
    static ref MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "telemetry_messages_total",
        "Telemetry messages handled by the ingestion loop, by outcome",
        &["outcome"]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref INGEST_DURATION: Histogram = register_histogram!(
        "telemetry_ingest_duration_seconds",
        "Time spent decoding, resolving and storing one message",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    static ref ENTITIES_CREATED: IntCounterVec = register_int_counter_vec!(
        "telemetry_entities_created_total",
        "Entities created on first sight by the ingestion path",
        &["kind"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// 0=stopped, 1=starting, 2=running, 3=draining
    static ref CONSUMER_STATE: IntGauge = register_int_gauge!(
        "telemetry_consumer_state",
        "Current lifecycle state of the telemetry consumer"
    ).expect("Prometheus metrics registration should succeed at startup");
}

pub fn record_message(outcome: &str, elapsed_secs: f64) {
    MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
    INGEST_DURATION.observe(elapsed_secs);
}

pub fn record_entity_created(kind: EntityKind) {
    ENTITIES_CREATED.with_label_values(&[kind.as_str()]).inc();
}

pub fn record_consumer_state(state: ConsumerState) {
    let value = match state {
        ConsumerState::Stopped => 0,
        ConsumerState::Starting => 1,
        ConsumerState::Running => 2,
        ConsumerState::Draining => 3,
    };
    CONSUMER_STATE.set(value);
}
