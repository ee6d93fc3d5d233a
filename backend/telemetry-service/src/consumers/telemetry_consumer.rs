//! Telemetry ingestion loop and its lifecycle
//!
//! States: `Stopped → Starting → Running → Draining → Stopped`.
//!
//! The loop is a single task pulling records in order, so appends for one
//! partition are issued in arrival order. The stop signal is only observed
//! between messages: a message that has been pulled always finishes (or fails)
//! its pipeline before the loop exits.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::pipeline::TelemetryPipeline;
use super::source::{InboundMessage, KafkaTelemetrySource, TelemetrySource};
use crate::config::{IngestConfig, KafkaConfig};
use crate::error::{IngestError, ResolveError, StartupError};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Stopped => "stopped",
            ConsumerState::Starting => "starting",
            ConsumerState::Running => "running",
            ConsumerState::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// Counters for one run of the ingestion loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub stored: u64,
    pub entities_created: u64,
    pub decode_failures: u64,
    pub unknown_kinds: u64,
    pub entities_not_found: u64,
    pub persistence_failures: u64,
    pub unexpected_failures: u64,
    pub receive_errors: u64,
}

impl IngestStats {
    /// Messages pulled but not stored
    pub fn discarded(&self) -> u64 {
        self.received - self.stored
    }
}

fn set_state(state_tx: &watch::Sender<ConsumerState>, state: ConsumerState) {
    let previous = state_tx.send_replace(state);
    if previous != state {
        info!(from = %previous, to = %state, "Telemetry consumer state changed");
        metrics::record_consumer_state(state);
    }
}

struct IngestionLoop<S> {
    source: S,
    pipeline: TelemetryPipeline,
    config: IngestConfig,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: Arc<watch::Sender<ConsumerState>>,
    stats: IngestStats,
}

impl<S: TelemetrySource> IngestionLoop<S> {
    async fn run(mut self) -> IngestStats {
        info!("Starting telemetry ingestion loop");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping telemetry consumer");
                        break;
                    }
                    continue;
                }

                next = tokio::time::timeout(self.config.poll_timeout, self.source.recv()) => next,
            };

            match next {
                // Read timeout: nothing available this cycle
                Err(_) => continue,
                Ok(None) => {
                    warn!("Telemetry source ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    self.stats.receive_errors += 1;
                    error!(error = %e, "Kafka consumer error");
                    self.backoff().await;
                }
                Ok(Some(Ok(message))) => self.handle_message(message).await,
            }
        }

        if *self.shutdown_rx.borrow() {
            set_state(&self.state_tx, ConsumerState::Draining);
        }
        self.source.close().await;
        set_state(&self.state_tx, ConsumerState::Stopped);

        info!(stats = ?self.stats, "Telemetry ingestion loop stopped");
        self.stats
    }

    /// Sleep after a broker error, waking early on shutdown.
    async fn backoff(&mut self) {
        tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => {}
            _ = tokio::time::sleep(self.config.error_backoff) => {}
        }
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        self.stats.received += 1;
        let started = Instant::now();

        let result = AssertUnwindSafe(self.pipeline.ingest(message.payload()))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(stored)) => {
                self.stats.stored += 1;
                if stored.entity_created {
                    self.stats.entities_created += 1;
                    metrics::record_entity_created(stored.kind);
                }
                "stored"
            }
            Ok(Err(err)) => {
                self.record_failure(&message, &err);
                err.outcome()
            }
            Err(panic) => {
                self.stats.unexpected_failures += 1;
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    panic = %panic_message(panic.as_ref()),
                    "Telemetry message handling panicked, message discarded"
                );
                "panic"
            }
        };

        metrics::record_message(outcome, started.elapsed().as_secs_f64());
    }

    fn record_failure(&mut self, message: &InboundMessage, err: &IngestError) {
        let topic = message.topic.as_str();
        let partition = message.partition;
        let offset = message.offset;

        match err {
            IngestError::Decode(e) => {
                self.stats.decode_failures += 1;
                let payload = e.payload().map(ToString::to_string).unwrap_or_default();
                warn!(topic, partition, offset, error = %e, payload = %payload, "Discarding undecodable telemetry message");
            }
            IngestError::UnknownEntityKind(e) => {
                self.stats.unknown_kinds += 1;
                warn!(topic, partition, offset, entity_kind = %e.0, "Discarding telemetry with unrecognized entity kind");
            }
            IngestError::Resolve(ResolveError::EntityNotFound { kind, name }) => {
                self.stats.entities_not_found += 1;
                warn!(topic, partition, offset, entity_kind = %kind, entity_name = %name, "Discarding telemetry for unregistered entity");
            }
            IngestError::Resolve(e) => {
                self.stats.persistence_failures += 1;
                error!(topic, partition, offset, error = %e, "Entity resolution failed, message discarded");
            }
            IngestError::Persistence(e) if e.is_unique_violation() => {
                self.stats.persistence_failures += 1;
                warn!(topic, partition, offset, error = %e, "Duplicate position sample, message discarded");
            }
            IngestError::Persistence(e) => {
                self.stats.persistence_failures += 1;
                error!(topic, partition, offset, error = %e, transient = e.is_transient(), "Failed to store position sample, message discarded");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Puts a consumer stuck in `Starting` back to `Stopped` when `start` exits
/// without spawning the loop.
struct StartingReset(Arc<watch::Sender<ConsumerState>>);

impl Drop for StartingReset {
    fn drop(&mut self) {
        if *self.0.borrow() == ConsumerState::Starting {
            set_state(&self.0, ConsumerState::Stopped);
        }
    }
}

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<IngestStats>,
}

/// Host-facing handle owning the consumer lifecycle
pub struct TelemetryConsumer {
    kafka: KafkaConfig,
    ingest: IngestConfig,
    pipeline: TelemetryPipeline,
    state_tx: Arc<watch::Sender<ConsumerState>>,
    running: Option<RunningLoop>,
}

impl TelemetryConsumer {
    pub fn new(kafka: KafkaConfig, ingest: IngestConfig, pipeline: TelemetryPipeline) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Stopped);
        Self {
            kafka,
            ingest,
            pipeline,
            state_tx: Arc::new(state_tx),
            running: None,
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state_tx.borrow()
    }

    /// Observe lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state_tx.subscribe()
    }

    /// Connect to Kafka and start ingesting.
    ///
    /// Broker failures here are fatal and leave the consumer `Stopped`.
    /// Dropping the returned future before it completes leaves the consumer
    /// `Stopped`.
    pub async fn start(&mut self) -> Result<(), StartupError> {
        self.begin_start()?;
        let _reset = StartingReset(Arc::clone(&self.state_tx));

        match KafkaTelemetrySource::connect(&self.kafka).await {
            Ok(source) => {
                self.spawn_loop(source);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, brokers = %self.kafka.brokers, "Telemetry consumer failed to start");
                Err(e)
            }
        }
    }

    /// Start ingesting from an already-connected source.
    pub fn start_with_source<S>(&mut self, source: S) -> Result<(), StartupError>
    where
        S: TelemetrySource + 'static,
    {
        self.begin_start()?;
        self.spawn_loop(source);
        Ok(())
    }

    /// Stop pulling, let the in-flight message finish, and release the source.
    ///
    /// Safe to call at any time; returns `None` when no loop was running.
    pub async fn stop(&mut self) -> Option<IngestStats> {
        let Some(running) = self.running.take() else {
            set_state(&self.state_tx, ConsumerState::Stopped);
            return None;
        };

        if !running.task.is_finished() {
            set_state(&self.state_tx, ConsumerState::Draining);
        }
        running.shutdown_tx.send_replace(true);

        let stats = match running.task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!(error = %e, "Telemetry ingestion task failed");
                None
            }
        };

        set_state(&self.state_tx, ConsumerState::Stopped);
        stats
    }

    fn begin_start(&mut self) -> Result<(), StartupError> {
        let current = self.state();
        if current != ConsumerState::Stopped {
            return Err(StartupError::AlreadyRunning(current));
        }

        // A loop whose source ran dry publishes Stopped as its last state
        // change; its task may still be unwinding, but it no longer touches
        // the source or the state channel.
        self.running = None;

        set_state(&self.state_tx, ConsumerState::Starting);
        Ok(())
    }

    fn spawn_loop<S>(&mut self, source: S)
    where
        S: TelemetrySource + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        set_state(&self.state_tx, ConsumerState::Running);

        let ingestion = IngestionLoop {
            source,
            pipeline: self.pipeline.clone(),
            config: self.ingest.clone(),
            shutdown_rx,
            state_tx: Arc::clone(&self.state_tx),
            stats: IngestStats::default(),
        };

        self.running = Some(RunningLoop {
            shutdown_tx,
            task: tokio::spawn(ingestion.run()),
        });
    }
}
