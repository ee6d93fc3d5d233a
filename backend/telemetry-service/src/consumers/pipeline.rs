//! Per-message pipeline: decode → resolve → append
//!
//! Each step either succeeds or yields an [`IngestError`]; the caller decides
//! what to log. Nothing is written unless decoding succeeded, and no sample is
//! written unless resolution succeeded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{self, TelemetryEvent};
use crate::error::{IngestError, PersistenceError, ResolveError};
use crate::models::{EntityKind, PositionSample, Resolved};
use crate::repository::{EntityResolver, PositionStore};

/// Successful handling of one message
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub kind: EntityKind,
    pub entity_id: Uuid,
    /// The message caused the entity to be created
    pub entity_created: bool,
    pub sample: PositionSample,
}

#[derive(Clone)]
pub struct TelemetryPipeline {
    resolver: Arc<dyn EntityResolver>,
    store: Arc<dyn PositionStore>,
    store_timeout: Duration,
}

impl TelemetryPipeline {
    pub fn new(
        resolver: Arc<dyn EntityResolver>,
        store: Arc<dyn PositionStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            store,
            store_timeout,
        }
    }

    /// Drive one raw payload through the pipeline.
    pub async fn ingest(&self, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        let event = codec::decode(payload)?;
        let kind: EntityKind = event.entity_kind.parse()?;
        let sample_time = event.sample_time();

        let resolved = self.resolve(kind, &event).await?;

        let sample = PositionSample {
            entity_id: resolved.id,
            x: event.x,
            y: event.y,
            z: event.z,
            sample_time,
        };

        self.with_timeout("append position", self.store.append(&sample))
            .await
            .map_err(IngestError::Persistence)?;

        debug!(
            entity_kind = %kind,
            entity_name = %event.entity_name,
            entity_id = %resolved.id,
            sample_time = %sample_time,
            "Telemetry sample stored"
        );

        Ok(IngestOutcome {
            kind,
            entity_id: resolved.id,
            entity_created: resolved.created,
            sample,
        })
    }

    async fn resolve(
        &self,
        kind: EntityKind,
        event: &TelemetryEvent,
    ) -> Result<Resolved, ResolveError> {
        let name = event.entity_name.as_str();
        if kind.is_auto_created() {
            self.with_timeout("resolve entity", self.resolver.resolve_or_create(kind, name))
                .await
        } else {
            self.with_timeout("resolve entity", self.resolver.resolve(kind, name))
                .await
                .map(Resolved::existing)
        }
    }

    /// Bound a storage call; expiry is reported as a [`PersistenceError`].
    async fn with_timeout<T, E, F>(&self, operation: &'static str, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<PersistenceError>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(E::from(PersistenceError::Timeout {
                operation,
                timeout: self.store_timeout,
            })),
        }
    }
}
