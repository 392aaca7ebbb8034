//! Audit events for lore ingestion and consistency sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::contradiction::Contradiction;
use super::entity::{CanonicalEntity, EntityType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum KnowledgeEvent {
    /// An entity was written under its canonical ID
    EntityCanonicalized {
        entity_id: String,
        entity_type: EntityType,
        name: String,
        timestamp: DateTime<Utc>,
    },
    /// Several extracted mentions collapsed into one entity
    EntitiesMerged {
        entity_id: String,
        merged_from: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    EntityRejected {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    RelationshipDropped {
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ContradictionDetected {
        session_id: String,
        entity_id: String,
        field: String,
        new_claim: String,
        existing_fact: String,
        timestamp: DateTime<Utc>,
    },
    /// A workflow session reached a terminal phase
    SessionFinished {
        session_id: String,
        phase: String,
        iterations: u32,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    /// A successful session's lore was written to the graph
    LoreCommitted {
        session_id: String,
        entities: usize,
        relationships: usize,
        timestamp: DateTime<Utc>,
    },
}

impl KnowledgeEvent {
    pub fn entity_canonicalized(entity: &CanonicalEntity) -> Self {
        Self::EntityCanonicalized {
            entity_id: entity.id.clone(),
            entity_type: entity.entity_type,
            name: entity.name.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn entities_merged(entity: &CanonicalEntity) -> Self {
        Self::EntitiesMerged {
            entity_id: entity.id.clone(),
            merged_from: entity.merged_from.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn entity_rejected(reason: impl Into<String>) -> Self {
        Self::EntityRejected {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn relationship_dropped(reason: impl Into<String>) -> Self {
        Self::RelationshipDropped {
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn contradiction_detected(session_id: &str, contradiction: &Contradiction) -> Self {
        Self::ContradictionDetected {
            session_id: session_id.to_string(),
            entity_id: contradiction.entity_id.clone(),
            field: contradiction.field.clone(),
            new_claim: contradiction.new_claim.clone(),
            existing_fact: contradiction.existing_fact.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn session_finished(session_id: &str, phase: &str, iterations: u32, success: bool) -> Self {
        Self::SessionFinished {
            session_id: session_id.to_string(),
            phase: phase.to_string(),
            iterations,
            success,
            timestamp: Utc::now(),
        }
    }

    pub fn lore_committed(session_id: &str, entities: usize, relationships: usize) -> Self {
        Self::LoreCommitted {
            session_id: session_id.to_string(),
            entities,
            relationships,
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EntityCanonicalized { timestamp, .. }
            | Self::EntitiesMerged { timestamp, .. }
            | Self::EntityRejected { timestamp, .. }
            | Self::RelationshipDropped { timestamp, .. }
            | Self::ContradictionDetected { timestamp, .. }
            | Self::SessionFinished { timestamp, .. }
            | Self::LoreCommitted { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::EntityCanonicalized { .. } => "entity_canonicalized",
            Self::EntitiesMerged { .. } => "entities_merged",
            Self::EntityRejected { .. } => "entity_rejected",
            Self::RelationshipDropped { .. } => "relationship_dropped",
            Self::ContradictionDetected { .. } => "contradiction_detected",
            Self::SessionFinished { .. } => "session_finished",
            Self::LoreCommitted { .. } => "lore_committed",
        }
    }

    /// The entity or session this event is about, if any
    pub fn aggregate_id(&self) -> Option<&str> {
        match self {
            Self::EntityCanonicalized { entity_id, .. }
            | Self::EntitiesMerged { entity_id, .. }
            | Self::ContradictionDetected { entity_id, .. } => Some(entity_id),
            Self::SessionFinished { session_id, .. } | Self::LoreCommitted { session_id, .. } => {
                Some(session_id)
            }
            Self::EntityRejected { .. } | Self::RelationshipDropped { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::entity::Properties;

    #[test]
    fn test_event_serialization_is_tagged() {
        let entity = CanonicalEntity::new(EntityType::Location, "Ruby Mines", Properties::new());
        let event = KnowledgeEvent::entity_canonicalized(&entity);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "entity_canonicalized");
        assert_eq!(json["entity_id"], "location:ruby_mines");
        assert_eq!(json["entity_type"], "location");

        let back: KnowledgeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_type_name_matches_tag() {
        let events = vec![
            KnowledgeEvent::entity_rejected("no name"),
            KnowledgeEvent::relationship_dropped("dangling"),
            KnowledgeEvent::session_finished("s-1", "complete", 2, true),
            KnowledgeEvent::lore_committed("s-1", 3, 1),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event_type"], event.event_type_name());
            assert!(event.timestamp() <= Utc::now());
        }
    }

    #[test]
    fn test_aggregate_id() {
        assert_eq!(
            KnowledgeEvent::session_finished("s-9", "failed", 0, false).aggregate_id(),
            Some("s-9")
        );
        assert_eq!(KnowledgeEvent::entity_rejected("x").aggregate_id(), None);
    }
}
