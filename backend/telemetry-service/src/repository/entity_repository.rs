//! Entity resolution: `(kind, name)` → stable id
//!
//! Planets are get-or-create. Ships are lookup-only; they are written by the
//! CRUD layer and a missing ship is reported as [`ResolveError::EntityNotFound`].
//!
//! Concurrent first sightings of the same planet are reconciled by the
//! `UNIQUE (name)` constraint: the losing insert affects zero rows and the
//! loser re-reads the winner's id. No in-process locking is involved, so any
//! number of consumers (and the CRUD layer) can share the tables.

use async_trait::async_trait;
use db_pool::acquire_with_metrics;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PersistenceError, ResolveError};
use crate::models::{Entity, EntityKind, Resolved};
use crate::SERVICE_NAME;

#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Look up `(kind, name)`, creating the entity when the kind is
    /// auto-created and no row exists yet. For other kinds this is a plain
    /// [`EntityResolver::resolve`].
    async fn resolve_or_create(&self, kind: EntityKind, name: &str)
        -> Result<Resolved, ResolveError>;

    /// Look up `(kind, name)` without creating anything.
    async fn resolve(&self, kind: EntityKind, name: &str) -> Result<Uuid, ResolveError>;

    async fn find_by_id(&self, kind: EntityKind, id: Uuid)
        -> Result<Option<Entity>, PersistenceError>;

    /// All entities of a kind, ordered by name
    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, PersistenceError>;
}

/// PostgreSQL-backed resolver over the `planets` and `ships` tables
#[derive(Clone)]
pub struct PostgresEntityResolver {
    pool: PgPool,
}

impl PostgresEntityResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_id_by_name(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Option<Uuid>, PersistenceError> {
        let sql = format!("SELECT id FROM {} WHERE name = $1", kind.table());
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let id = sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(id)
    }

    /// Returns false when another writer already owns `name`.
    async fn insert_if_absent(
        &self,
        kind: EntityKind,
        id: Uuid,
        name: &str,
    ) -> Result<bool, PersistenceError> {
        let sql = format!(
            "INSERT INTO {} (id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
            kind.table()
        );
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(name)
            .execute(&mut *conn)
            .await
            .map_err(PersistenceError::from);

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EntityResolver for PostgresEntityResolver {
    async fn resolve_or_create(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<Resolved, ResolveError> {
        if !kind.is_auto_created() {
            return self.resolve(kind, name).await.map(Resolved::existing);
        }

        if let Some(id) = self.find_id_by_name(kind, name).await? {
            return Ok(Resolved::existing(id));
        }

        let id = Uuid::new_v4();
        if self.insert_if_absent(kind, id, name).await? {
            info!(entity_kind = %kind, entity_name = %name, entity_id = %id, "Created entity on first sighting");
            return Ok(Resolved::created(id));
        }

        let conflict = ResolveError::ConflictOnCreate {
            kind,
            name: name.to_string(),
        };
        debug!(error = %conflict, "Lost creation race, re-reading winner");

        match self.find_id_by_name(kind, name).await? {
            Some(id) => Ok(Resolved::existing(id)),
            None => Err(conflict),
        }
    }

    async fn resolve(&self, kind: EntityKind, name: &str) -> Result<Uuid, ResolveError> {
        self.find_id_by_name(kind, name)
            .await?
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
        let sql = format!("SELECT id, name FROM {} WHERE id = $1", kind.table());
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let row = sqlx::query_as::<_, (Uuid, String)>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|(id, name)| Entity { id, kind, name }))
    }

    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, PersistenceError> {
        let sql = format!("SELECT id, name FROM {} ORDER BY name", kind.table());
        let mut conn = acquire_with_metrics(&self.pool, SERVICE_NAME).await?;

        let rows = sqlx::query_as::<_, (Uuid, String)>(&sql)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| Entity { id, kind, name })
            .collect())
    }
}
