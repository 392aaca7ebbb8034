//! Canonicalization engine
//!
//! Turns noisy extractor output into stable graph identities:
//!
//! 1. **Classify**: map raw type labels onto [`EntityType`], reject nameless
//!    or schema-invalid entities with a warning.
//! 2. **Group**: bucket entities by [`canonical_id`], preserving first-seen order.
//! 3. **Merge**: per property key, the highest-confidence member wins; ties
//!    keep the first-seen value.
//! 4. **Resolve**: map relationship endpoint names to canonical IDs through
//!    the completed name index. Unknown or ambiguous names drop the
//!    relationship; nothing is ever linked to a guessed ID.
//!
//! Grouping always finishes before resolution starts. Output depends only on
//! the input order and contents.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entity::{
    CanonicalEntity, ClassifiedEntity, EntityType, ExtractedEntity, normalize_name,
};
use super::extractor::Extraction;
use super::relationship::{
    CanonicalRelationship, RawRelationshipMention, normalize_relationship_type,
};
use super::schema::{SchemaRegistry, SchemaViolation};

/// Output of one canonicalization pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalizationResult {
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
    pub warnings: Vec<String>,
}

impl CanonicalizationResult {
    /// Number of entities that absorbed more than one member
    pub fn merged_count(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| e.merged_from.len() > 1)
            .count()
    }

    pub fn entity(&self, id: &str) -> Option<&CanonicalEntity> {
        self.entities.iter().find(|e| e.id == id)
    }
}

/// Generated content decomposed into validation candidates
///
/// Unlike ingestion, schema problems do not drop entities here; they are kept
/// so the validator can count them. Entities that cannot be typed or named at
/// all are reported in `rejected`, one violation each.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
    pub rejected: Vec<SchemaViolation>,
    pub warnings: Vec<String>,
}

/// Deterministic entity resolver
#[derive(Debug, Clone, Default)]
pub struct Canonicalizer {
    registry: SchemaRegistry,
    min_confidence: f32,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard extracted entities below this confidence during classification
    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Classify extracted entities, collecting a warning for every rejection
    pub fn classify(&self, extracted: Vec<ExtractedEntity>) -> (Vec<ClassifiedEntity>, Vec<String>) {
        let mut classified = Vec::with_capacity(extracted.len());
        let mut warnings = Vec::new();

        for entity in extracted {
            match self.classify_one(entity) {
                Ok(entity) => classified.push(entity),
                Err(warning) => {
                    warn!(reason = %warning, "Rejected extracted entity");
                    warnings.push(warning);
                }
            }
        }

        (classified, warnings)
    }

    fn classify_one(&self, entity: ExtractedEntity) -> Result<ClassifiedEntity, String> {
        let name = entity.name.trim();
        if normalize_name(name).is_empty() {
            return Err(format!(
                "Rejected entity of type '{}': missing name",
                entity.entity_type
            ));
        }

        let entity_type = EntityType::parse(&entity.entity_type).ok_or_else(|| {
            format!(
                "Rejected entity '{}': unmapped entity type '{}'",
                name, entity.entity_type
            )
        })?;

        if entity.confidence < self.min_confidence {
            return Err(format!(
                "Rejected entity '{}': confidence {:.2} is below the minimum {:.2}",
                name, entity.confidence, self.min_confidence
            ));
        }

        let classified = ClassifiedEntity::new(entity_type, name, entity.properties)
            .with_confidence(entity.confidence)
            .with_aliases(entity.aliases);

        let violations = self
            .registry
            .validate(entity_type, &classified.properties);
        if !violations.is_empty() {
            let details = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(format!(
                "Rejected {} '{}': {}",
                entity_type, name, details
            ));
        }

        Ok(classified)
    }

    /// Classify and canonicalize a full extraction
    ///
    /// Items the extractor emitted in an undecodable shape come first in the
    /// warnings, followed by classification and resolution warnings.
    pub fn canonicalize_extraction(&self, extraction: Extraction) -> CanonicalizationResult {
        let mut warnings = extraction.entity_rejections();
        warnings.extend(extraction.relationship_rejections());

        let (classified, rejections) = self.classify(extraction.entities);
        warnings.extend(rejections);

        let mut result = self.canonicalize(classified, extraction.relationships);
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        result
    }

    /// Merge classified entities into canonical ones and resolve relationships
    pub fn canonicalize(
        &self,
        entities: Vec<ClassifiedEntity>,
        mentions: Vec<RawRelationshipMention>,
    ) -> CanonicalizationResult {
        let mut warnings = Vec::new();

        // Phase 1: group by canonical ID
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<ClassifiedEntity>> = HashMap::new();

        for entity in entities {
            if normalize_name(&entity.name).is_empty() {
                let warning = format!("Rejected {} entity: missing name", entity.entity_type);
                warn!(reason = %warning, "Rejected classified entity");
                warnings.push(warning);
                continue;
            }

            let id = entity.canonical_id();
            groups
                .entry(id.clone())
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(entity);
        }

        let canonical: Vec<CanonicalEntity> = order
            .into_iter()
            .filter_map(|id| {
                let members = groups.remove(&id)?;
                Some(merge_group(id, members))
            })
            .collect();

        // Phase 2: resolve relationships against the completed index
        let index = NameIndex::build(&canonical);
        let mut relationships: Vec<CanonicalRelationship> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for mention in mentions {
            match resolve_mention(&index, mention) {
                Ok(relationship) => {
                    let key = relationship.key();
                    if let Some(&pos) = positions.get(&key) {
                        let existing = &mut relationships[pos];
                        for (k, v) in relationship.properties {
                            existing.properties.entry(k).or_insert(v);
                        }
                    } else {
                        positions.insert(key, relationships.len());
                        relationships.push(relationship);
                    }
                }
                Err(warning) => {
                    warn!(reason = %warning, "Dropped relationship");
                    warnings.push(warning);
                }
            }
        }

        debug!(
            entities = canonical.len(),
            relationships = relationships.len(),
            warnings = warnings.len(),
            "Canonicalization pass complete"
        );

        CanonicalizationResult {
            entities: canonical,
            relationships,
            warnings,
        }
    }

    /// Decompose generated entities into validation candidates
    pub fn decompose_candidates(
        &self,
        entities: Vec<ExtractedEntity>,
        mentions: Vec<RawRelationshipMention>,
    ) -> CandidateSet {
        let mut rejected = Vec::new();
        let mut classified = Vec::with_capacity(entities.len());

        for entity in entities {
            let name = entity.name.trim();
            let Some(entity_type) = EntityType::parse(&entity.entity_type) else {
                let label = if name.is_empty() { "<unnamed>" } else { name };
                rejected.push(
                    SchemaViolation::new(
                        "type",
                        format!("unmapped entity type '{}'", entity.entity_type),
                    )
                    .qualified(label),
                );
                continue;
            };

            if normalize_name(name).is_empty() {
                rejected.push(
                    SchemaViolation::new("name", "required field is missing")
                        .qualified(&format!("{}:<unnamed>", entity_type)),
                );
                continue;
            }

            classified.push(
                ClassifiedEntity::new(entity_type, name, entity.properties)
                    .with_confidence(entity.confidence)
                    .with_aliases(entity.aliases),
            );
        }

        let result = self.canonicalize(classified, mentions);

        CandidateSet {
            entities: result.entities,
            relationships: result.relationships,
            rejected,
            warnings: result.warnings,
        }
    }

    /// Decompose a whole extraction, counting undecodable entities as rejected
    pub fn decompose_extraction(&self, extraction: Extraction) -> CandidateSet {
        let mut rejected: Vec<SchemaViolation> = extraction
            .malformed_entities
            .iter()
            .map(|m| SchemaViolation::new(format!("entities[{}]", m.index), m.error.clone()))
            .collect();
        let mut warnings = extraction.relationship_rejections();

        let mut candidates =
            self.decompose_candidates(extraction.entities, extraction.relationships);
        rejected.append(&mut candidates.rejected);
        candidates.rejected = rejected;
        warnings.append(&mut candidates.warnings);
        candidates.warnings = warnings;
        candidates
    }
}

fn merge_group(id: String, members: Vec<ClassifiedEntity>) -> CanonicalEntity {
    let mut properties = super::entity::Properties::new();
    let mut winning_confidence: HashMap<String, f32> = HashMap::new();
    let mut merged_from: Vec<String> = Vec::new();
    let mut aliases: Vec<String> = Vec::new();
    let mut confidence = 0.0_f32;

    for member in &members {
        confidence = confidence.max(member.confidence);

        for (key, value) in &member.properties {
            if value.is_null() {
                continue;
            }
            match winning_confidence.get(key) {
                Some(&current) if member.confidence <= current => {}
                _ => {
                    winning_confidence.insert(key.clone(), member.confidence);
                    properties.insert(key.clone(), value.clone());
                }
            }
        }

        for source in &member.provenance {
            if !merged_from.contains(source) {
                merged_from.push(source.clone());
            }
        }

        for alias in &member.aliases {
            let normalized = normalize_name(alias);
            if !normalized.is_empty()
                && !aliases.iter().any(|a| normalize_name(a) == normalized)
            {
                aliases.push(alias.clone());
            }
        }
    }

    let name = properties
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| members[0].name.clone());

    if members.len() > 1 {
        debug!(entity_id = %id, members = members.len(), "Merged duplicate entities");
    }

    CanonicalEntity {
        id,
        entity_type: members[0].entity_type,
        name,
        properties,
        merged_from,
        aliases,
        confidence,
    }
}

/// Normalized name → canonical IDs, built from names, provenance, and aliases
struct NameIndex {
    ids_by_name: HashMap<String, Vec<String>>,
}

enum Unresolved {
    Unknown,
    Ambiguous(Vec<String>),
}

impl NameIndex {
    fn build(entities: &[CanonicalEntity]) -> Self {
        let mut ids_by_name: HashMap<String, Vec<String>> = HashMap::new();

        for entity in entities {
            let names = std::iter::once(&entity.name)
                .chain(entity.merged_from.iter())
                .chain(entity.aliases.iter());
            for name in names {
                let ids = ids_by_name.entry(normalize_name(name)).or_default();
                if !ids.contains(&entity.id) {
                    ids.push(entity.id.clone());
                }
            }
        }

        Self { ids_by_name }
    }

    fn resolve(&self, name: &str) -> Result<&str, Unresolved> {
        match self.ids_by_name.get(&normalize_name(name)).map(Vec::as_slice) {
            Some([id]) => Ok(id.as_str()),
            Some(ids) if ids.len() > 1 => Err(Unresolved::Ambiguous(ids.to_vec())),
            _ => Err(Unresolved::Unknown),
        }
    }
}

fn resolve_mention(
    index: &NameIndex,
    mention: RawRelationshipMention,
) -> Result<CanonicalRelationship, String> {
    let relationship_type = normalize_relationship_type(&mention.relationship_type);
    let describe = |reason: String| {
        format!(
            "Dropped relationship '{}' -[{}]-> '{}': {}",
            mention.from_name, mention.relationship_type, mention.to_name, reason
        )
    };

    if relationship_type.is_empty() {
        return Err(describe("missing relationship type".to_string()));
    }

    let endpoint = |name: &str| -> Result<String, String> {
        index.resolve(name).map(str::to_string).map_err(|e| match e {
            Unresolved::Unknown => describe(format!("unresolved entity '{}'", name)),
            Unresolved::Ambiguous(ids) => describe(format!(
                "ambiguous entity '{}' matches {}",
                name,
                ids.join(", ")
            )),
        })
    };

    let from_id = endpoint(&mention.from_name)?;
    let to_id = endpoint(&mention.to_name)?;

    let mut relationship = CanonicalRelationship::new(&relationship_type, from_id, to_id);
    relationship.properties = mention.properties;
    Ok(relationship)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn location(name: &str, description: &str) -> ExtractedEntity {
        ExtractedEntity::new("location", name).with_property("description", description)
    }

    fn faction(name: &str, confidence: f32) -> ClassifiedEntity {
        let mut properties = super::super::entity::Properties::new();
        properties.insert("description".into(), json!(format!("{} description", name)));
        ClassifiedEntity::new(EntityType::Faction, name, properties).with_confidence(confidence)
    }

    #[test]
    fn test_duplicate_cluster_merges_by_confidence() {
        let canonicalizer = Canonicalizer::new();
        let mut low = faction("Crimson Empire", 0.4);
        low.properties.insert("leader_name".into(), json!("Empress Vara"));
        low.properties.insert("ideology".into(), json!("expansionist"));
        let mut high = faction("crimson  empire", 0.9);
        high.properties.insert("leader_name".into(), json!("Emperor Kael"));

        let result = canonicalizer.canonicalize(vec![low, high], vec![]);

        assert_eq!(result.entities.len(), 1);
        let merged = &result.entities[0];
        assert_eq!(merged.id, "faction:crimson_empire");
        assert_eq!(merged.property("leader_name"), Some(&json!("Emperor Kael")));
        // Keys only the low-confidence member had still survive
        assert_eq!(merged.property("ideology"), Some(&json!("expansionist")));
        assert_eq!(merged.name, "crimson  empire");
        assert_eq!(merged.confidence, 0.9);
        assert_eq!(
            merged.merged_from,
            vec!["Crimson Empire".to_string(), "crimson  empire".to_string()]
        );
    }

    #[test]
    fn test_confidence_ties_keep_first_seen() {
        let canonicalizer = Canonicalizer::new();
        let mut first = faction("Silver Covenant", 0.7);
        first.properties.insert("leader_name".into(), json!("Ser Maren"));
        let mut second = faction("Silver Covenant", 0.7);
        second.properties.insert("leader_name".into(), json!("Ser Oswin"));

        let result = canonicalizer.canonicalize(vec![first, second], vec![]);
        assert_eq!(result.entities[0].property("leader_name"), Some(&json!("Ser Maren")));
    }

    #[test]
    fn test_group_order_follows_first_appearance() {
        let canonicalizer = Canonicalizer::new();
        let result = canonicalizer.canonicalize(
            vec![
                faction("Silver Covenant", 0.5),
                faction("Crimson Empire", 0.5),
                faction("Silver Covenant", 0.6),
            ],
            vec![],
        );
        let ids: Vec<&str> = result.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["faction:silver_covenant", "faction:crimson_empire"]);
    }

    #[test]
    fn test_classification_rejects_with_warnings() {
        let canonicalizer = Canonicalizer::new();
        let extraction = Extraction {
            entities: vec![
                location("Ruby Mines", "Deep mines"),
                ExtractedEntity::new("spaceship", "Star Runner").with_property("description", "A ship"),
                ExtractedEntity::new("location", "   ").with_property("description", "Nowhere"),
                ExtractedEntity::new("location", "Ash Hills"),
            ],
            relationships: vec![],
            ..Default::default()
        };

        let result = canonicalizer.canonicalize_extraction(extraction);

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings[0].contains("unmapped entity type 'spaceship'"));
        assert!(result.warnings[1].contains("missing name"));
        assert!(result.warnings[2].contains("description: required field is missing"));
    }

    #[test]
    fn test_min_confidence_filter() {
        let canonicalizer = Canonicalizer::new().with_min_confidence(0.6);
        let (classified, warnings) = canonicalizer.classify(vec![
            location("Ruby Mines", "Deep mines").with_confidence(0.9),
            location("Ash Hills", "Grey hills").with_confidence(0.3),
        ]);
        assert_eq!(classified.len(), 1);
        assert!(warnings[0].contains("below the minimum"));
    }

    #[test]
    fn test_relationships_resolve_through_names_and_aliases() {
        let canonicalizer = Canonicalizer::new();
        let extraction = Extraction {
            entities: vec![
                ExtractedEntity::new("faction", "Crimson Empire")
                    .with_property("description", "An empire")
                    .with_aliases(vec!["The Empire".to_string()]),
                location("Ruby Mines", "Deep mines"),
            ],
            relationships: vec![
                RawRelationshipMention::new("the empire", "Ruby Mines", "Controls"),
                RawRelationshipMention::new("Crimson Empire", "ruby mines", "CONTROLS"),
            ],
            ..Default::default()
        };

        let result = canonicalizer.canonicalize_extraction(extraction);

        assert!(result.warnings.is_empty());
        assert_eq!(result.relationships.len(), 1);
        let rel = &result.relationships[0];
        assert_eq!(rel.relationship_type, "controls");
        assert_eq!(rel.from_id, "faction:crimson_empire");
        assert_eq!(rel.to_id, "location:ruby_mines");
    }

    #[test]
    fn test_dangling_relationship_is_dropped_with_warning() {
        let canonicalizer = Canonicalizer::new();
        let extraction = Extraction {
            entities: vec![location("Ruby Mines", "Deep mines")],
            relationships: vec![RawRelationshipMention::new(
                "Silver Covenant",
                "Ruby Mines",
                "raids",
            )],
            ..Default::default()
        };

        let result = canonicalizer.canonicalize_extraction(extraction);

        assert!(result.relationships.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("unresolved entity 'Silver Covenant'"));
    }

    #[test]
    fn test_ambiguous_name_is_never_guessed() {
        let canonicalizer = Canonicalizer::new();
        let extraction = Extraction {
            entities: vec![
                location("Ruby Mines", "Deep mines"),
                ExtractedEntity::new("resource", "Ruby Mines").with_property("description", "Mining rights"),
                ExtractedEntity::new("faction", "Crimson Empire").with_property("description", "An empire"),
            ],
            relationships: vec![RawRelationshipMention::new(
                "Crimson Empire",
                "Ruby Mines",
                "controls",
            )],
            ..Default::default()
        };

        let result = canonicalizer.canonicalize_extraction(extraction);

        assert_eq!(result.entities.len(), 3);
        assert!(result.relationships.is_empty());
        assert!(result.warnings[0].contains("ambiguous entity 'Ruby Mines'"));
    }

    #[test]
    fn test_canonicalizing_output_again_is_a_no_op() {
        let canonicalizer = Canonicalizer::new();
        let extraction = Extraction {
            entities: vec![
                location("Ruby Mines", "Deep mines").with_confidence(0.4),
                location("ruby mines", "Very deep mines").with_confidence(0.8),
                ExtractedEntity::new("faction", "Crimson Empire").with_property("description", "An empire"),
            ],
            relationships: vec![RawRelationshipMention::new(
                "Crimson Empire",
                "Ruby Mines",
                "controls",
            )],
            ..Default::default()
        };

        let first = canonicalizer.canonicalize_extraction(extraction);
        let second = canonicalizer.canonicalize(
            first.entities.iter().map(CanonicalEntity::to_classified).collect(),
            vec![RawRelationshipMention::new("Crimson Empire", "Ruby Mines", "controls")],
        );

        assert_eq!(first.entities, second.entities);
        assert_eq!(first.relationships, second.relationships);
    }

    #[test]
    fn test_decompose_keeps_schema_invalid_entities() {
        let canonicalizer = Canonicalizer::new();
        let candidates = canonicalizer.decompose_candidates(
            vec![
                ExtractedEntity::new("location", "Ruby Mines"),
                ExtractedEntity::new("dragon", "Ashwing"),
                ExtractedEntity::new("faction", ""),
            ],
            vec![],
        );

        assert_eq!(candidates.entities.len(), 1);
        assert_eq!(candidates.rejected.len(), 2);
        assert_eq!(candidates.rejected[0].field, "Ashwing.type");
        assert_eq!(candidates.rejected[1].field, "faction:<unnamed>.name");
    }

    #[test]
    fn test_relationship_without_type_is_dropped() {
        let canonicalizer = Canonicalizer::new();
        let extraction = Extraction {
            entities: vec![
                location("Ruby Mines", "Deep mines"),
                ExtractedEntity::new("faction", "Crimson Empire").with_property("description", "An empire"),
            ],
            relationships: vec![RawRelationshipMention::new("Crimson Empire", "Ruby Mines", "  ")],
            ..Default::default()
        };

        let result = canonicalizer.canonicalize_extraction(extraction);

        assert_eq!(result.entities.len(), 2);
        assert!(result.relationships.is_empty());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("missing relationship type"));
    }

    fn mixed_extraction() -> Extraction {
        serde_json::from_value(json!({
            "entities": [
                {"type": "location", "name": "Ruby Mines", "properties": {"description": "Deep mines"}},
                {"type": "faction", "name": null},
                {"name": "Silver Covenant"}
            ],
            "relationships": [
                {"source": "Ruby Mines", "type": "borders"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_undecodable_items_become_warnings() {
        let result = Canonicalizer::new().canonicalize_extraction(mixed_extraction());

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].id, "location:ruby_mines");
        assert_eq!(result.warnings.len(), 3);
        assert!(result.warnings[0].starts_with("Rejected entity #1:"));
        assert!(result.warnings[1].starts_with("Rejected entity #2:"));
        assert!(result.warnings[2].starts_with("Dropped relationship #0:"));
    }

    #[test]
    fn test_decompose_extraction_counts_undecodable_entities() {
        let candidates = Canonicalizer::new().decompose_extraction(mixed_extraction());

        assert_eq!(candidates.entities.len(), 1);
        assert_eq!(candidates.rejected.len(), 2);
        assert_eq!(candidates.rejected[0].field, "entities[1]");
        assert_eq!(candidates.rejected[1].field, "entities[2]");
        assert_eq!(candidates.warnings.len(), 1);
    }
}
