//! Lore relationships
//!
//! Relationships arrive as raw name mentions from the extractor and are
//! only kept once both endpoints resolve to canonical entity IDs.

use serde::{Deserialize, Serialize};

use super::entity::Properties;

/// A relationship as mentioned by the extractor, keyed by entity names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRelationshipMention {
    #[serde(alias = "source", alias = "from")]
    pub from_name: String,
    #[serde(alias = "target", alias = "to")]
    pub to_name: String,
    #[serde(rename = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub properties: Properties,
}

impl RawRelationshipMention {
    pub fn new(
        from_name: impl Into<String>,
        to_name: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            from_name: from_name.into(),
            to_name: to_name.into(),
            relationship_type: relationship_type.into(),
            properties: Properties::new(),
        }
    }
}

/// A relationship whose endpoints are canonical entity IDs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRelationship {
    /// Normalized relationship type (e.g. `controls`, `allied_with`)
    #[serde(rename = "type")]
    pub relationship_type: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(default)]
    pub properties: Properties,
}

impl CanonicalRelationship {
    pub fn new(
        relationship_type: &str,
        from_id: impl Into<String>,
        to_id: impl Into<String>,
    ) -> Self {
        Self {
            relationship_type: normalize_relationship_type(relationship_type),
            from_id: from_id.into(),
            to_id: to_id.into(),
            properties: Properties::new(),
        }
    }

    /// Identity used for deduplication and idempotent upserts
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.from_id, self.relationship_type, self.to_id)
    }

    /// Whether either endpoint is the given entity
    pub fn touches(&self, entity_id: &str) -> bool {
        self.from_id == entity_id || self.to_id == entity_id
    }
}

/// Normalize a relationship label: `"Allied With"` → `"allied_with"`
pub fn normalize_relationship_type(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_relationship_type() {
        assert_eq!(normalize_relationship_type("CONTROLS"), "controls");
        assert_eq!(normalize_relationship_type("Allied With"), "allied_with");
        assert_eq!(normalize_relationship_type("at-war-with"), "at_war_with");
        assert_eq!(normalize_relationship_type("  "), "");
    }

    #[test]
    fn test_relationship_key() {
        let rel = CanonicalRelationship::new("Controls", "faction:crimson_empire", "location:ruby_mines");
        assert_eq!(rel.key(), "faction:crimson_empire|controls|location:ruby_mines");
        assert!(rel.touches("location:ruby_mines"));
        assert!(!rel.touches("location:silver_peaks"));
    }

    #[test]
    fn test_mention_accepts_source_target_aliases() {
        let mention: RawRelationshipMention = serde_json::from_str(
            r#"{"source": "Crimson Empire", "target": "Ruby Mines", "type": "controls"}"#,
        )
        .unwrap();
        assert_eq!(mention.from_name, "Crimson Empire");
        assert_eq!(mention.to_name, "Ruby Mines");
        assert!(mention.properties.is_empty());
    }
}
