//! Lore entity types
//!
//! Entities move through a one-way pipeline during ingestion:
//! [`ExtractedEntity`] (raw extractor output) → [`ClassifiedEntity`]
//! (closed type, schema-checked) → [`CanonicalEntity`] (stable identity,
//! duplicates merged).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form entity properties as produced by the extractor
pub type Properties = Map<String, Value>;

/// Separator between the type and the normalized name in a canonical ID
pub const ID_SEPARATOR: char = ':';

/// The closed set of lore entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Organized group with shared goals (guild, empire, covenant)
    Faction,
    /// Named person or creature
    Character,
    /// Place in the world
    Location,
    /// Material, artifact, or commodity
    Resource,
    /// Something that happened
    Event,
}

impl EntityType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Faction => "faction",
            Self::Character => "character",
            Self::Location => "location",
            Self::Resource => "resource",
            Self::Event => "event",
        }
    }

    /// Parse from string, accepting common extractor spellings
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "faction" | "factions" | "organization" | "organisation" => Some(Self::Faction),
            "character" | "characters" | "person" | "npc" => Some(Self::Character),
            "location" | "locations" | "place" => Some(Self::Location),
            "resource" | "resources" | "item" | "artifact" => Some(Self::Resource),
            "event" | "events" => Some(Self::Event),
            _ => None,
        }
    }

    /// Get all entity types
    pub fn all() -> &'static [EntityType] {
        &[
            Self::Faction,
            Self::Character,
            Self::Location,
            Self::Resource,
            Self::Event,
        ]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalize a name for identity purposes
///
/// Lowercases, strips non-alphanumeric characters, and collapses whitespace
/// runs into a single underscore.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Compute the canonical ID for an entity
///
/// Pure function of `(entity_type, normalize_name(name))`; re-ingesting the
/// same name always yields the same ID.
pub fn canonical_id(entity_type: EntityType, name: &str) -> String {
    format!("{}{}{}", entity_type.as_str(), ID_SEPARATOR, normalize_name(name))
}

/// An entity as produced by the extractor, before any validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Raw type label; may not map to an [`EntityType`]
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Raw name; empty when the extractor omitted it
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_confidence() -> f32 {
    0.5
}

impl ExtractedEntity {
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            properties: Properties::new(),
            confidence: default_confidence(),
            aliases: Vec::new(),
        }
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Set confidence score
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add aliases
    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }
}

/// An entity whose type is one of the closed set and whose name is usable
///
/// The display name is always mirrored into `properties["name"]` so schema
/// checks and contradiction checks see it like any other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedEntity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    pub properties: Properties,
    pub confidence: f32,
    pub aliases: Vec<String>,
    /// Original names this entity was built from
    pub provenance: Vec<String>,
}

impl ClassifiedEntity {
    pub fn new(entity_type: EntityType, name: impl Into<String>, properties: Properties) -> Self {
        let name = name.into();
        let mut properties = properties;
        properties.insert("name".to_string(), Value::String(name.clone()));

        Self {
            entity_type,
            provenance: vec![name.clone()],
            name,
            properties,
            confidence: default_confidence(),
            aliases: Vec::new(),
        }
    }

    /// Set confidence score
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Add aliases
    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    /// The canonical ID this entity resolves to
    pub fn canonical_id(&self) -> String {
        canonical_id(self.entity_type, &self.name)
    }
}

/// The single deduplicated representation of a named thing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Deterministic ID, see [`canonical_id`]
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// Display name of the winning member
    pub name: String,
    pub properties: Properties,
    /// Names of every member that contributed to this entity
    pub merged_from: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Highest confidence among the merged members
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

impl CanonicalEntity {
    /// Build a single-member canonical entity
    pub fn new(entity_type: EntityType, name: impl Into<String>, properties: Properties) -> Self {
        let classified = ClassifiedEntity::new(entity_type, name, properties);
        Self {
            id: classified.canonical_id(),
            entity_type,
            merged_from: classified.provenance,
            name: classified.name,
            properties: classified.properties,
            aliases: Vec::new(),
            confidence: classified.confidence,
        }
    }

    /// Set a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Get a property value
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Whether this entity answers to a name (including aliases)
    pub fn matches_name(&self, query: &str) -> bool {
        let normalized = normalize_name(query);
        if normalize_name(&self.name) == normalized {
            return true;
        }
        self.aliases
            .iter()
            .any(|alias| normalize_name(alias) == normalized)
    }

    /// Convert back into pipeline input, preserving provenance
    ///
    /// Feeding the result through canonicalization again reproduces this entity.
    pub fn to_classified(&self) -> ClassifiedEntity {
        ClassifiedEntity {
            entity_type: self.entity_type,
            name: self.name.clone(),
            properties: self.properties.clone(),
            confidence: self.confidence,
            aliases: self.aliases.clone(),
            provenance: self.merged_from.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Ruby Mines"), "ruby_mines");
        assert_eq!(normalize_name("  The   Crimson  Empire "), "the_crimson_empire");
        assert_eq!(normalize_name("Silver-Covenant!"), "silvercovenant");
        assert_eq!(normalize_name("???"), "");
    }

    #[test]
    fn test_canonical_id_is_deterministic() {
        let first = canonical_id(EntityType::Location, "Ruby Mines");
        let second = canonical_id(EntityType::Location, "  ruby   MINES ");
        assert_eq!(first, "location:ruby_mines");
        assert_eq!(first, second);
    }

    #[test]
    fn test_canonical_id_depends_on_type() {
        assert_ne!(
            canonical_id(EntityType::Location, "Ruby Mines"),
            canonical_id(EntityType::Resource, "Ruby Mines")
        );
    }

    #[test]
    fn test_entity_type_parsing() {
        assert_eq!(EntityType::parse("Faction"), Some(EntityType::Faction));
        assert_eq!(EntityType::parse(" person "), Some(EntityType::Character));
        assert_eq!(EntityType::parse("place"), Some(EntityType::Location));
        assert_eq!(EntityType::parse("spaceship"), None);
        assert_eq!(EntityType::all().len(), 5);
    }

    #[test]
    fn test_classified_entity_mirrors_name_into_properties() {
        let entity = ClassifiedEntity::new(EntityType::Faction, "Crimson Empire", Properties::new());
        assert_eq!(entity.properties.get("name"), Some(&json!("Crimson Empire")));
        assert_eq!(entity.provenance, vec!["Crimson Empire".to_string()]);
        assert_eq!(entity.canonical_id(), "faction:crimson_empire");
    }

    #[test]
    fn test_extracted_entity_deserializes_with_defaults() {
        let entity: ExtractedEntity =
            serde_json::from_str(r#"{"type": "location", "name": "Ruby Mines"}"#).unwrap();
        assert_eq!(entity.confidence, 0.5);
        assert!(entity.properties.is_empty());

        let nameless: ExtractedEntity = serde_json::from_str(r#"{"type": "event"}"#).unwrap();
        assert!(nameless.name.is_empty());
    }

    #[test]
    fn test_matches_name_includes_aliases() {
        let mut entity = CanonicalEntity::new(EntityType::Faction, "Silver Covenant", Properties::new());
        entity.aliases.push("The Covenant".to_string());

        assert!(entity.matches_name("silver covenant"));
        assert!(entity.matches_name("the  covenant"));
        assert!(!entity.matches_name("Crimson Empire"));
    }
}
