//! In-memory fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use telemetry_service::consumers::{InboundMessage, TelemetryPipeline, TelemetrySource};
use telemetry_service::error::{PersistenceError, ResolveError, SourceError};
use telemetry_service::models::{Entity, EntityKind, PositionSample, Resolved};
use telemetry_service::repository::{EntityResolver, PositionStore};

pub fn telemetry_json(kind: &str, name: &str, x: f64, timestamp_ms: i64) -> Vec<u8> {
    serde_json::json!({
        "type_object": kind,
        "name": name,
        "x": x,
        "y": 0.5,
        "z": -2.0,
        "timestamp": timestamp_ms,
    })
    .to_string()
    .into_bytes()
}

#[derive(Default)]
pub struct InMemoryEntityResolver {
    entities: Mutex<HashMap<(EntityKind, String), Uuid>>,
    panic_on_name: Mutex<Option<String>>,
    pub resolve_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
}

impl InMemoryEntityResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-register an entity the way the CRUD layer would.
    pub fn register(&self, kind: EntityKind, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.entities
            .lock()
            .unwrap()
            .insert((kind, name.to_string()), id);
        id
    }

    pub fn panic_on(&self, name: &str) {
        *self.panic_on_name.lock().unwrap() = Some(name.to_string());
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entities
            .lock()
            .unwrap()
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst) + self.create_calls.load(Ordering::SeqCst)
    }

    fn check_panic(&self, name: &str) {
        if self.panic_on_name.lock().unwrap().as_deref() == Some(name) {
            panic!("resolver exploded on {name}");
        }
    }
}

#[async_trait]
impl EntityResolver for InMemoryEntityResolver {
    async fn resolve_or_create(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Resolved, ResolveError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_panic(name);
        tokio::task::yield_now().await;

        if !kind.is_auto_created() {
            return self.resolve(kind, name).await.map(Resolved::existing);
        }

        let key = (kind, name.to_string());
        let mut entities = self.entities.lock().unwrap();
        if let Some(id) = entities.get(&key) {
            return Ok(Resolved::existing(*id));
        }

        let id = Uuid::new_v4();
        entities.insert(key, id);
        Ok(Resolved::created(id))
    }

    async fn resolve(&self, kind: EntityKind, name: &str) -> Result<Uuid, ResolveError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.check_panic(name);

        self.entities
            .lock()
            .unwrap()
            .get(&(kind, name.to_string()))
            .copied()
            .ok_or_else(|| ResolveError::EntityNotFound {
                kind,
                name: name.to_string(),
            })
    }

    async fn find_by_id(
        &self,
        kind: EntityKind,
        id: Uuid,
    ) -> Result<Option<Entity>, PersistenceError> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .find(|((k, _), entity_id)| *k == kind && **entity_id == id)
            .map(|((_, name), _)| Entity {
                id,
                kind,
                name: name.clone(),
            }))
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, PersistenceError> {
        let mut entities: Vec<Entity> = self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, name), id)| Entity {
                id: *id,
                kind,
                name: name.clone(),
            })
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entities)
    }
}

#[derive(Default)]
pub struct InMemoryPositionStore {
    samples: Mutex<Vec<PositionSample>>,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
    /// Notified whenever an append begins
    pub append_started: Notify,
}

impl InMemoryPositionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_appends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn slow_appends(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn samples(&self) -> Vec<PositionSample> {
        self.samples.lock().unwrap().clone()
    }

    fn sorted_for(&self, entity_id: Uuid) -> Vec<PositionSample> {
        let mut samples: Vec<PositionSample> = self
            .samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.entity_id == entity_id)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.sample_time);
        samples
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn append(&self, sample: &PositionSample) -> Result<(), PersistenceError> {
        self.append_started.notify_one();

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut));
        }

        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }

    async fn latest(&self, entity_id: Uuid) -> Result<Option<PositionSample>, PersistenceError> {
        Ok(self.sorted_for(entity_id).pop())
    }

    async fn latest_batch(
        &self,
        entity_ids: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, PositionSample>, PersistenceError> {
        Ok(entity_ids
            .iter()
            .filter_map(|id| self.sorted_for(*id).pop().map(|s| (*id, s)))
            .collect())
    }

    async fn history(&self, entity_id: Uuid) -> Result<Vec<PositionSample>, PersistenceError> {
        let mut samples = self.sorted_for(entity_id);
        samples.reverse();
        Ok(samples)
    }

    async fn history_batch(
        &self,
        entity_ids: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, Vec<PositionSample>>, PersistenceError> {
        Ok(entity_ids
            .iter()
            .map(|id| (*id, self.sorted_for(*id)))
            .filter(|(_, samples)| !samples.is_empty())
            .collect())
    }
}

pub fn pipeline(
    resolver: &Arc<InMemoryEntityResolver>,
    store: &Arc<InMemoryPositionStore>,
    store_timeout: Duration,
) -> TelemetryPipeline {
    TelemetryPipeline::new(resolver.clone(), store.clone(), store_timeout)
}

/// Source fed through an unbounded channel. Dropping the sender ends it.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<InboundMessage, SourceError>>,
    pub closed: Arc<AtomicBool>,
}

pub type SourceSender = mpsc::UnboundedSender<Result<InboundMessage, SourceError>>;

impl ChannelSource {
    pub fn new() -> (SourceSender, Self, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            tx,
            Self {
                rx,
                closed: closed.clone(),
            },
            closed,
        )
    }
}

#[async_trait]
impl TelemetrySource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<InboundMessage, SourceError>> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
