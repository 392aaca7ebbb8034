//! Graph store collaborator traits
//!
//! The graph database itself lives outside this crate. The core only needs
//! to read the persisted version of an entity and to upsert canonical
//! entities and relationships.

use async_trait::async_trait;

use crate::error::Result;

use super::entity::{CanonicalEntity, EntityType, Properties};
use super::relationship::CanonicalRelationship;

/// Read access to persisted entities
///
/// Implementations must be read-consistent within a process: a lookup that
/// follows a write sees the write.
#[async_trait]
pub trait GraphLookup: Send + Sync {
    /// Find the persisted properties of the entity with this type and name
    async fn find_existing(
        &self,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Properties>>;
}

/// Write access to the graph
///
/// Upserts must be idempotent: writing identical data twice leaves a single
/// record. The canonical ID scheme depends on this under re-ingestion.
#[async_trait]
pub trait GraphWriter: Send + Sync {
    async fn upsert_entity(&self, entity: &CanonicalEntity) -> Result<()>;

    async fn upsert_relationship(&self, relationship: &CanonicalRelationship) -> Result<()>;
}
