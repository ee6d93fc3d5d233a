pub mod entity_repository;
pub mod position_repository;

pub use entity_repository::{EntityResolver, PostgresEntityResolver};
pub use position_repository::{PositionStore, PostgresPositionStore};
