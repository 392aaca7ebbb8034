//! Contradiction detection against persisted lore
//!
//! A candidate entity contradicts the graph when a property present on both
//! the candidate and the persisted record of the same `(type, name)` holds a
//! different value. Comparison is exact: `"Crimson Empire "` and
//! `"Crimson Empire"` are different claims.
//!
//! A failed lookup makes the entity *unverifiable*. That is neither a pass
//! nor a contradiction, and callers must not treat it as valid.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::entity::{CanonicalEntity, Properties};
use super::repository::GraphLookup;

/// Identity and bookkeeping fields that never count as claims
pub const IGNORED_FIELDS: &[&str] = &["id", "name", "created_at", "updated_at"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    PropertyMismatch,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PropertyMismatch => "property_mismatch",
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A conflict between a new claim and a persisted fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub entity_id: String,
    pub field: String,
    pub new_claim: String,
    pub existing_fact: String,
    pub conflict_type: ConflictType,
}

/// Outcome of checking one entity against the graph
#[derive(Debug, Clone, PartialEq)]
pub enum ContradictionCheck {
    /// No persisted record exists; the entity is a new fact
    NewFact,
    /// A persisted record was compared; may contain zero contradictions
    Verified(Vec<Contradiction>),
    /// The lookup failed; the reason is kept for reporting
    Unverifiable(String),
}

impl ContradictionCheck {
    pub fn contradictions(&self) -> &[Contradiction] {
        match self {
            Self::Verified(found) => found,
            Self::NewFact | Self::Unverifiable(_) => &[],
        }
    }

    pub fn is_unverifiable(&self) -> bool {
        matches!(self, Self::Unverifiable(_))
    }
}

/// Compares candidate entities with their persisted versions
#[derive(Clone)]
pub struct ContradictionDetector {
    lookup: Arc<dyn GraphLookup>,
}

impl std::fmt::Debug for ContradictionDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContradictionDetector").finish_non_exhaustive()
    }
}

impl ContradictionDetector {
    pub fn new(lookup: Arc<dyn GraphLookup>) -> Self {
        Self { lookup }
    }

    /// Check a candidate entity against its persisted version
    pub async fn check(&self, entity: &CanonicalEntity) -> ContradictionCheck {
        match self.lookup.find_existing(entity.entity_type, &entity.name).await {
            Ok(None) => {
                debug!(entity_id = %entity.id, "No persisted record, treating as new fact");
                ContradictionCheck::NewFact
            }
            Ok(Some(existing)) => {
                let found = Self::compare(entity, &existing);
                if !found.is_empty() {
                    debug!(entity_id = %entity.id, count = found.len(), "Contradictions detected");
                }
                ContradictionCheck::Verified(found)
            }
            Err(e) => {
                warn!(entity_id = %entity.id, error = %e, "Graph lookup failed, entity is unverifiable");
                ContradictionCheck::Unverifiable(format!(
                    "Could not verify '{}' against the graph: {}",
                    entity.id, e
                ))
            }
        }
    }

    /// Compare a candidate's properties with a persisted record
    pub fn compare(entity: &CanonicalEntity, existing: &Properties) -> Vec<Contradiction> {
        entity
            .properties
            .iter()
            .filter(|(key, _)| !IGNORED_FIELDS.contains(&key.as_str()))
            .filter_map(|(key, new_value)| {
                let old_value = existing.get(key)?;
                if new_value.is_null() || old_value.is_null() || new_value == old_value {
                    return None;
                }
                Some(Contradiction {
                    entity_id: entity.id.clone(),
                    field: key.clone(),
                    new_claim: format!("{}.{} = {}", entity.name, key, render(new_value)),
                    existing_fact: format!("{}.{} = {}", entity.name, key, render(old_value)),
                    conflict_type: ConflictType::PropertyMismatch,
                })
            })
            .collect()
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::entity::EntityType;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedLookup(Option<Properties>);

    #[async_trait]
    impl GraphLookup for FixedLookup {
        async fn find_existing(&self, _: EntityType, _: &str) -> Result<Option<Properties>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenLookup;

    #[async_trait]
    impl GraphLookup for BrokenLookup {
        async fn find_existing(&self, _: EntityType, _: &str) -> Result<Option<Properties>> {
            Err(Error::GraphStoreUnavailable("connection refused".to_string()))
        }
    }

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    fn ruby_mines(controlling_faction: &str) -> CanonicalEntity {
        CanonicalEntity::new(EntityType::Location, "Ruby Mines", Properties::new())
            .with_property("controlling_faction", controlling_faction)
    }

    #[tokio::test]
    async fn test_property_mismatch_is_reported_once() {
        let existing = props(json!({"name": "Ruby Mines", "controlling_faction": "Crimson Empire"}));
        let detector = ContradictionDetector::new(Arc::new(FixedLookup(Some(existing))));

        let check = detector.check(&ruby_mines("Silver Covenant")).await;
        let found = check.contradictions();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].conflict_type, ConflictType::PropertyMismatch);
        assert_eq!(found[0].field, "controlling_faction");
        assert!(found[0].new_claim.contains("Silver Covenant"));
        assert!(found[0].existing_fact.contains("Crimson Empire"));
    }

    #[tokio::test]
    async fn test_missing_record_is_a_new_fact() {
        let detector = ContradictionDetector::new(Arc::new(FixedLookup(None)));
        let check = detector.check(&ruby_mines("Silver Covenant")).await;
        assert_eq!(check, ContradictionCheck::NewFact);
        assert!(check.contradictions().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_unverifiable() {
        let detector = ContradictionDetector::new(Arc::new(BrokenLookup));
        let check = detector.check(&ruby_mines("Silver Covenant")).await;
        assert!(check.is_unverifiable());
        assert!(check.contradictions().is_empty());
    }

    #[test]
    fn test_bookkeeping_fields_are_ignored() {
        let candidate = ruby_mines("Crimson Empire")
            .with_property("id", "location:ruby_mines")
            .with_property("updated_at", "2026-01-01T00:00:00Z");
        let existing = props(json!({
            "id": "loc-42",
            "name": "RUBY MINES",
            "controlling_faction": "Crimson Empire",
            "updated_at": "2025-06-01T00:00:00Z"
        }));

        assert!(ContradictionDetector::compare(&candidate, &existing).is_empty());
    }

    #[test]
    fn test_fields_missing_on_either_side_are_not_conflicts() {
        let candidate = ruby_mines("Crimson Empire").with_property("region", "Ash Hills");
        let existing = props(json!({"strategic_value": 80, "controlling_faction": null}));
        assert!(ContradictionDetector::compare(&candidate, &existing).is_empty());
    }

    #[test]
    fn test_trailing_whitespace_counts_as_contradiction() {
        let candidate = ruby_mines("Crimson Empire ");
        let existing = props(json!({"controlling_faction": "Crimson Empire"}));
        assert_eq!(ContradictionDetector::compare(&candidate, &existing).len(), 1);
    }

    #[test]
    fn test_numeric_mismatch() {
        let candidate = ruby_mines("Crimson Empire").with_property("strategic_value", 40);
        let existing = props(json!({"strategic_value": 85}));
        let found = ContradictionDetector::compare(&candidate, &existing);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].existing_fact, "Ruby Mines.strategic_value = 85");
    }
}
