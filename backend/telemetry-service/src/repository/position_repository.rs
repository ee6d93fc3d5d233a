//! Time-ordered, append-only position samples
//!
//! Read ordering is part of the contract and differs between forms:
//! [`PositionStore::history`] returns newest first, while
//! [`PositionStore::history_batch`] returns each entity's samples oldest first.
//! Callers rely on both orders; do not unify them.

use async_trait::async_trait;
use db_pool::acquire_with_metrics;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::models::PositionSample;
use crate::SERVICE_NAME;

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// Persist one sample. No retry happens here.
    async fn append(&self, sample: &PositionSample) -> Result<(), PersistenceError>;

    /// Sample with the greatest `sample_time`, if any.
    async fn latest(&self, entity_id: Uuid) -> Result<Option<PositionSample>, PersistenceError>;

    /// [`PositionStore::latest`] for many entities in one round trip. Entities
    /// without samples are absent from the map.
    async fn latest_batch(
        &self,
        entity_ids: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, PositionSample>, PersistenceError>;

    /// Full history, descending by `sample_time`.
    async fn history(&self, entity_id: Uuid) -> Result<Vec<PositionSample>, PersistenceError>;

    /// Full history per entity, ascending by `sample_time`.
    async fn history_batch(
        &self,
        entity_ids: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, Vec<PositionSample>>, PersistenceError>;
}

#[derive(Clone)]
pub struct PostgresPositionStore {
    pool: PgPool,
}

impl PostgresPositionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PositionStore for PostgresPositionStore {
    async fn append(&self, sample: &PositionSample) -> Result<(), PersistenceError> {
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        sqlx::query(
            r#"
            INSERT INTO positions (entity_id, x, y, z, sample_time)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(sample.entity_id)
        .bind(sample.x)
        .bind(sample.y)
        .bind(sample.z)
        .bind(sample.sample_time)
        .execute(&mut *conn)
        .await?;

        debug!(
            entity_id = %sample.entity_id,
            sample_time = %sample.sample_time,
            "Position sample appended"
        );
        Ok(())
    }

    async fn latest(&self, entity_id: Uuid) -> Result<Option<PositionSample>, PersistenceError> {
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let sample = sqlx::query_as::<_, PositionSample>(
            r#"
            SELECT entity_id, x, y, z, sample_time
            FROM positions
            WHERE entity_id = $1
            ORDER BY sample_time DESC
            LIMIT 1
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(sample)
    }

    async fn latest_batch(
        &self,
        entity_ids: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, PositionSample>, PersistenceError> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<Uuid> = entity_ids.iter().copied().collect();
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let samples = sqlx::query_as::<_, PositionSample>(
            r#"
            SELECT DISTINCT ON (entity_id) entity_id, x, y, z, sample_time
            FROM positions
            WHERE entity_id = ANY($1)
            ORDER BY entity_id, sample_time DESC
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        Ok(samples
            .into_iter()
            .map(|sample| (sample.entity_id, sample))
            .collect())
    }

    async fn history(&self, entity_id: Uuid) -> Result<Vec<PositionSample>, PersistenceError> {
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let samples = sqlx::query_as::<_, PositionSample>(
            r#"
            SELECT entity_id, x, y, z, sample_time
            FROM positions
            WHERE entity_id = $1
            ORDER BY sample_time DESC
            "#,
        )
        .bind(entity_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(samples)
    }

    async fn history_batch(
        &self,
        entity_ids: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, Vec<PositionSample>>, PersistenceError> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<Uuid> = entity_ids.iter().copied().collect();
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let samples = sqlx::query_as::<_, PositionSample>(
            r#"
            SELECT entity_id, x, y, z, sample_time
            FROM positions
            WHERE entity_id = ANY($1)
            ORDER BY entity_id, sample_time ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *conn)
        .await?;

        Ok(group_by_entity(samples))
    }
}

/// Group rows by entity, keeping each group's input order.
pub(crate) fn group_by_entity(samples: Vec<PositionSample>) -> HashMap<Uuid, Vec<PositionSample>> {
    let mut grouped: HashMap<Uuid, Vec<PositionSample>> = HashMap::new();
    for sample in samples {
        grouped.entry(sample.entity_id).or_default().push(sample);
    }
    grouped
}
