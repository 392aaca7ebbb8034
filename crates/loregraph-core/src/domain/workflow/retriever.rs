//! Graph-backed context retrieval

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::knowledge::{CanonicalEntity, normalize_name};
use crate::error::Result;
use crate::storage::InMemoryGraphStore;

use super::collaborators::{RetrievedContext, Retriever};

/// Default cap on neighbor entities pulled in through relationships
const DEFAULT_MAX_NEIGHBORS: usize = 10;

/// Retrieves entities named in the query plus their direct neighborhood
#[derive(Debug, Clone)]
pub struct GraphRetriever {
    store: Arc<InMemoryGraphStore>,
    max_neighbors: usize,
}

impl GraphRetriever {
    pub fn new(store: Arc<InMemoryGraphStore>) -> Self {
        Self {
            store,
            max_neighbors: DEFAULT_MAX_NEIGHBORS,
        }
    }

    pub fn with_max_neighbors(mut self, max_neighbors: usize) -> Self {
        self.max_neighbors = max_neighbors;
        self
    }
}

/// One sentence of facts per entity
fn fact_document(entity: &CanonicalEntity) -> String {
    let facts = entity
        .properties
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "name" | "created_at" | "updated_at"))
        .map(|(key, value)| match value.as_str() {
            Some(s) => format!("{} is {}", key, s),
            None => format!("{} is {}", key, value),
        })
        .collect::<Vec<_>>();

    if facts.is_empty() {
        format!("{} is a known {}.", entity.name, entity.entity_type)
    } else {
        format!("{} ({}): {}.", entity.name, entity.entity_type, facts.join("; "))
    }
}

/// Share of query words covered by the matched entity names
fn relevance(query: &str, matched: &[CanonicalEntity]) -> f32 {
    let query_words: HashSet<String> = normalize_name(query)
        .split('_')
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect();
    if query_words.is_empty() {
        return 0.0;
    }

    let covered = matched
        .iter()
        .flat_map(|e| std::iter::once(&e.name).chain(e.aliases.iter()))
        .flat_map(|name| {
            normalize_name(name)
                .split('_')
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|w| query_words.contains(w))
        .collect::<HashSet<_>>()
        .len();

    (covered as f32 / query_words.len() as f32).clamp(0.0, 1.0)
}

#[async_trait]
impl Retriever for GraphRetriever {
    async fn retrieve(&self, query: &str) -> Result<RetrievedContext> {
        let matched = self.store.find_mentioned(query).await;
        if matched.is_empty() {
            debug!(query, "No entities mentioned in query");
            return Ok(RetrievedContext::empty());
        }

        let mut seen: HashSet<String> = matched.iter().map(|e| e.id.clone()).collect();
        let mut relationships = Vec::new();
        let mut neighbors = Vec::new();

        for entity in &matched {
            for relationship in self.store.relationships_touching(&entity.id).await {
                let other = if relationship.from_id == entity.id {
                    &relationship.to_id
                } else {
                    &relationship.from_id
                };
                if neighbors.len() < self.max_neighbors
                    && seen.insert(other.clone())
                    && let Some(neighbor) = self.store.entity(other).await
                {
                    neighbors.push(neighbor);
                }
                if !relationships.contains(&relationship) {
                    relationships.push(relationship);
                }
            }
        }

        let relevance_score = relevance(query, &matched);
        let entities: Vec<CanonicalEntity> = matched.into_iter().chain(neighbors).collect();
        let documents = entities.iter().map(fact_document).collect();

        debug!(
            entities = entities.len(),
            relationships = relationships.len(),
            relevance_score,
            "Retrieved graph context"
        );

        Ok(RetrievedContext {
            entities,
            relationships,
            documents,
            relevance_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::{CanonicalRelationship, EntityType, GraphWriter, Properties};

    async fn seeded_store() -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        store
            .upsert_entity(
                &CanonicalEntity::new(EntityType::Location, "Ruby Mines", Properties::new())
                    .with_property("controlling_faction", "Crimson Empire"),
            )
            .await
            .unwrap();
        store
            .upsert_entity(&CanonicalEntity::new(EntityType::Faction, "Crimson Empire", Properties::new()))
            .await
            .unwrap();
        store
            .upsert_relationship(&CanonicalRelationship::new(
                "controls",
                "faction:crimson_empire",
                "location:ruby_mines",
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_retrieves_mentioned_entities_and_neighbors() {
        let retriever = GraphRetriever::new(seeded_store().await);
        let context = retriever.retrieve("Who controls the Ruby Mines?").await.unwrap();

        assert_eq!(context.entities.len(), 2);
        assert_eq!(context.entities[0].id, "location:ruby_mines");
        assert_eq!(context.relationships.len(), 1);
        assert_eq!(
            context.documents[0],
            "Ruby Mines (location): controlling_faction is Crimson Empire."
        );
        assert_eq!(context.documents[1], "Crimson Empire is a known faction.");
        assert!(context.relevance_score > 0.0 && context.relevance_score <= 1.0);
    }

    #[tokio::test]
    async fn test_unknown_query_is_empty() {
        let retriever = GraphRetriever::new(seeded_store().await);
        let context = retriever.retrieve("Who rules the moon?").await.unwrap();
        assert!(context.is_empty());
        assert_eq!(context.relevance_score, 0.0);
    }

    #[tokio::test]
    async fn test_neighbor_cap() {
        let retriever = GraphRetriever::new(seeded_store().await).with_max_neighbors(0);
        let context = retriever.retrieve("the ruby mines").await.unwrap();
        assert_eq!(context.entities.len(), 1);
        assert_eq!(context.relationships.len(), 1);
    }

    #[test]
    fn test_relevance() {
        let mines = CanonicalEntity::new(EntityType::Location, "Ruby Mines", Properties::new());
        // two of the five query words are covered
        assert_eq!(relevance("Who controls the Ruby Mines?", &[mines]), 0.4);
        assert_eq!(relevance("?", &[]), 0.0);
    }
}
