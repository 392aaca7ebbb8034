//! Retrieval and generation collaborators
//!
//! The controller drives these through trait objects so sessions can run
//! against the real graph and LLM, or against scripted test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::knowledge::{
    CanonicalEntity, CanonicalRelationship, ExtractedEntity, RawRelationshipMention,
    ValidationResult,
};
use crate::error::{Error, Result};
use crate::llm::extract_json_from_response;

/// Context retrieved for a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
    pub documents: Vec<String>,
    /// How well the context matches the query, in [0, 1]
    pub relevance_score: f32,
}

impl RetrievedContext {
    /// Empty context with a zero score
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty() && self.documents.is_empty()
    }

    /// Render the context as plain text for a prompt
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for entity in &self.entities {
            let facts = entity
                .properties
                .iter()
                .filter(|(key, _)| key.as_str() != "name")
                .map(|(key, value)| match value.as_str() {
                    Some(s) => format!("{}={}", key, s),
                    None => format!("{}={}", key, value),
                })
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("[{}] {}: {}", entity.entity_type, entity.name, facts));
        }
        for relationship in &self.relationships {
            lines.push(format!(
                "{} -[{}]-> {}",
                relationship.from_id, relationship.relationship_type, relationship.to_id
            ));
        }
        lines.extend(self.documents.iter().cloned());
        lines.join("\n")
    }
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<RetrievedContext>;
}

/// Everything a generator sees for one attempt
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub session_id: &'a str,
    pub query: &'a str,
    pub context: &'a RetrievedContext,
    /// 1-based attempt number
    pub iteration: u32,
    /// Verdict on the previous attempt, if any
    pub previous: Option<&'a ValidationResult>,
}

/// Generation collaborator
///
/// Returns raw model text; the controller parses it with [`parse_generated`].
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

/// Structured generator output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedLore {
    pub text: String,
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<RawRelationshipMention>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// Parse raw generator output
pub fn parse_generated(raw: &str) -> Result<GeneratedLore> {
    let json = extract_json_from_response(raw);
    let lore: GeneratedLore =
        serde_json::from_str(json).map_err(|e| Error::GenerationParseFailed(e.to_string()))?;
    if lore.text.trim().is_empty() {
        return Err(Error::GenerationParseFailed("response text is empty".to_string()));
    }
    Ok(lore)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::{EntityType, Properties};

    #[test]
    fn test_parse_generated() {
        let raw = r#"```json
{"text": "The Crimson Empire controls the Ruby Mines.",
 "entities": [{"type": "location", "name": "Ruby Mines", "properties": {"controlling_faction": "Crimson Empire"}}],
 "relationships": [],
 "confidence": 0.8,
 "reasoning": "Matches retrieved facts"}
```"#;
        let lore = parse_generated(raw).unwrap();
        assert_eq!(lore.entities.len(), 1);
        assert_eq!(lore.confidence, 0.8);
    }

    #[test]
    fn test_parse_generated_rejects_prose_and_empty_text() {
        assert_eq!(parse_generated("I refuse").unwrap_err().code(), "E901");
        assert_eq!(parse_generated(r#"{"text": "  "}"#).unwrap_err().code(), "E901");
    }

    #[test]
    fn test_context_emptiness_and_render() {
        assert!(RetrievedContext::empty().is_empty());

        let context = RetrievedContext {
            entities: vec![
                CanonicalEntity::new(EntityType::Location, "Ruby Mines", Properties::new())
                    .with_property("controlling_faction", "Crimson Empire"),
            ],
            documents: vec!["The mines glow at night.".to_string()],
            relevance_score: 0.7,
            ..Default::default()
        };
        assert!(!context.is_empty());

        let rendered = context.render();
        assert!(rendered.contains("[location] Ruby Mines: controlling_faction=Crimson Empire"));
        assert!(rendered.ends_with("The mines glow at night."));
    }
}
