//! In-memory lore graph with JSON snapshot persistence
//!
//! Entities are keyed by canonical ID and relationships by
//! `from|type|to`, so repeated upserts of the same data never create
//! duplicates. Reads after writes in the same process see the writes.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::knowledge::{
    CanonicalEntity, CanonicalRelationship, EntityType, GraphLookup, GraphWriter, Properties,
    canonical_id, normalize_name,
};
use crate::error::{Error, Result};

/// Snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub relationships_by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct Graph {
    entities: BTreeMap<String, CanonicalEntity>,
    relationships: BTreeMap<String, CanonicalRelationship>,
}

#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<Graph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let graph = Graph {
            entities: snapshot
                .entities
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect(),
            relationships: snapshot
                .relationships
                .into_iter()
                .map(|r| (r.key(), r))
                .collect(),
        };
        Self {
            graph: RwLock::new(graph),
        }
    }

    /// Load a snapshot file; a missing file yields an empty store
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No graph snapshot, starting empty");
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(Error::GraphStoreUnavailable(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let snapshot: GraphSnapshot = serde_json::from_str(&contents)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(Error::GraphStoreUnavailable(format!(
                "snapshot version {} is newer than supported version {}",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        info!(
            path = %path.display(),
            entities = snapshot.entities.len(),
            relationships = snapshot.relationships.len(),
            "Loaded graph snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write a snapshot file, replacing any previous one atomically
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), "Saved graph snapshot");
        Ok(())
    }

    pub async fn snapshot(&self) -> GraphSnapshot {
        let graph = self.graph.read().await;
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            entities: graph.entities.values().cloned().collect(),
            relationships: graph.relationships.values().cloned().collect(),
        }
    }

    pub async fn entity(&self, id: &str) -> Option<CanonicalEntity> {
        self.graph.read().await.entities.get(id).cloned()
    }

    pub async fn entities(&self) -> Vec<CanonicalEntity> {
        self.graph.read().await.entities.values().cloned().collect()
    }

    pub async fn relationships_touching(&self, entity_id: &str) -> Vec<CanonicalRelationship> {
        self.graph
            .read()
            .await
            .relationships
            .values()
            .filter(|r| r.touches(entity_id))
            .cloned()
            .collect()
    }

    /// Entities whose name or alias appears in the text as whole words
    pub async fn find_mentioned(&self, text: &str) -> Vec<CanonicalEntity> {
        let haystack = format!("_{}_", normalize_name(text));
        let mentioned = |name: &str| {
            let needle = normalize_name(name);
            !needle.is_empty() && haystack.contains(&format!("_{}_", needle))
        };

        self.graph
            .read()
            .await
            .entities
            .values()
            .filter(|e| mentioned(&e.name) || e.aliases.iter().any(|a| mentioned(a)))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> GraphStats {
        let graph = self.graph.read().await;
        let mut stats = GraphStats {
            entity_count: graph.entities.len(),
            relationship_count: graph.relationships.len(),
            ..Default::default()
        };
        for entity in graph.entities.values() {
            *stats
                .entities_by_type
                .entry(entity.entity_type.to_string())
                .or_default() += 1;
        }
        for relationship in graph.relationships.values() {
            *stats
                .relationships_by_type
                .entry(relationship.relationship_type.clone())
                .or_default() += 1;
        }
        stats
    }
}

/// Fold an incoming entity into the stored one
fn merge_into(stored: &mut CanonicalEntity, incoming: &CanonicalEntity) {
    for (key, value) in &incoming.properties {
        if !value.is_null() {
            stored.properties.insert(key.clone(), value.clone());
        }
    }
    for source in &incoming.merged_from {
        if !stored.merged_from.contains(source) {
            stored.merged_from.push(source.clone());
        }
    }
    for alias in &incoming.aliases {
        if !stored.aliases.contains(alias) {
            stored.aliases.push(alias.clone());
        }
    }
    stored.confidence = stored.confidence.max(incoming.confidence);
}

#[async_trait]
impl GraphLookup for InMemoryGraphStore {
    async fn find_existing(
        &self,
        entity_type: EntityType,
        name: &str,
    ) -> Result<Option<Properties>> {
        let graph = self.graph.read().await;
        if let Some(entity) = graph.entities.get(&canonical_id(entity_type, name)) {
            return Ok(Some(entity.properties.clone()));
        }

        let by_alias = graph
            .entities
            .values()
            .find(|e| e.entity_type == entity_type && e.matches_name(name));
        Ok(by_alias.map(|e| e.properties.clone()))
    }
}

#[async_trait]
impl GraphWriter for InMemoryGraphStore {
    async fn upsert_entity(&self, entity: &CanonicalEntity) -> Result<()> {
        let now = Value::String(Utc::now().to_rfc3339());
        let mut graph = self.graph.write().await;

        match graph.entities.get_mut(&entity.id) {
            Some(stored) => {
                merge_into(stored, entity);
                stored.properties.insert("updated_at".to_string(), now);
                debug!(entity_id = %entity.id, "Updated entity");
            }
            None => {
                let mut stored = entity.clone();
                stored.properties.insert("created_at".to_string(), now.clone());
                stored.properties.insert("updated_at".to_string(), now);
                graph.entities.insert(stored.id.clone(), stored);
                debug!(entity_id = %entity.id, "Created entity");
            }
        }
        Ok(())
    }

    async fn upsert_relationship(&self, relationship: &CanonicalRelationship) -> Result<()> {
        let mut graph = self.graph.write().await;
        for endpoint in [&relationship.from_id, &relationship.to_id] {
            if !graph.entities.contains_key(endpoint) {
                return Err(Error::EntityNotFound(endpoint.clone()));
            }
        }

        let key = relationship.key();
        match graph.relationships.get_mut(&key) {
            Some(stored) => {
                for (k, v) in &relationship.properties {
                    stored.properties.insert(k.clone(), v.clone());
                }
            }
            None => {
                graph.relationships.insert(key, relationship.clone());
            }
        }
        Ok(())
    }
}
