//! Domain records shared by the resolver, the position store and the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of tracked object, as carried in the `type_object` wire field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Planet,
    Ship,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Planet, EntityKind::Ship];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Planet => "planet",
            EntityKind::Ship => "ship",
        }
    }

    /// Whether ingestion creates the entity on first sight.
    ///
    /// Planets are discovered from telemetry; ships must be registered
    /// beforehand by the CRUD layer.
    pub fn is_auto_created(&self) -> bool {
        matches!(self, EntityKind::Planet)
    }

    /// Backing table. Static so it can be interpolated into SQL.
    pub(crate) fn table(&self) -> &'static str {
        match self {
            EntityKind::Planet => "planets",
            EntityKind::Ship => "ships",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised for a `type_object` value that names no known kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized entity kind: {0:?}")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planet" => Ok(EntityKind::Planet),
            "ship" => Ok(EntityKind::Ship),
            other => Err(UnknownEntityKind(other.to_string())),
        }
    }
}

/// A uniquely named planet or ship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub name: String,
}

/// Outcome of resolving a `(kind, name)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub id: Uuid,
    /// True only for the call that inserted the entity
    pub created: bool,
}

impl Resolved {
    pub fn existing(id: Uuid) -> Self {
        Self { id, created: false }
    }

    pub fn created(id: Uuid) -> Self {
        Self { id, created: true }
    }
}

/// One immutable `(entity, instant, coordinates)` record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PositionSample {
    pub entity_id: Uuid,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub sample_time: DateTime<Utc>,
}
