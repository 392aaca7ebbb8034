//! Entity extraction from narrative text
//!
//! An [`Extractor`] turns prose into raw entity and relationship mentions.
//! Nothing here is trusted: classification and canonicalization happen
//! downstream in the [`Canonicalizer`](super::canonicalizer::Canonicalizer).

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::llm::{ChatCompletion, Message, PromptLog, extract_json_from_response, prompt_ids, truncate_chars};

use super::entity::{EntityType, ExtractedEntity};
use super::relationship::RawRelationshipMention;

/// Version of the extraction prompt recorded in the prompt log
pub const EXTRACTION_PROMPT_VERSION: u32 = 1;

/// Longest input passed to the model in one request
const MAX_INPUT_CHARS: usize = 12_000;

/// Raw extractor output
///
/// Items are decoded one at a time; an item that does not decode is kept
/// aside as a [`MalformedItem`] and the rest of the batch survives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawExtraction")]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<RawRelationshipMention>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub malformed_entities: Vec<MalformedItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub malformed_relationships: Vec<MalformedItem>,
}

/// An extractor item that could not be decoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedItem {
    /// Position in the original array
    pub index: usize,
    pub error: String,
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<Value>,
    #[serde(default)]
    relationships: Vec<Value>,
    #[serde(default)]
    malformed_entities: Vec<MalformedItem>,
    #[serde(default)]
    malformed_relationships: Vec<MalformedItem>,
}

fn decode_items<T: DeserializeOwned>(
    items: Vec<Value>,
    kind: &str,
    malformed: &mut Vec<MalformedItem>,
) -> Vec<T> {
    let mut decoded = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value(item) {
            Ok(value) => decoded.push(value),
            Err(e) => {
                warn!(kind, index, error = %e, "Skipping malformed extractor item");
                malformed.push(MalformedItem {
                    index,
                    error: e.to_string(),
                });
            }
        }
    }
    decoded
}

impl From<RawExtraction> for Extraction {
    fn from(raw: RawExtraction) -> Self {
        let mut malformed_entities = raw.malformed_entities;
        let mut malformed_relationships = raw.malformed_relationships;
        let entities = decode_items(raw.entities, "entity", &mut malformed_entities);
        let relationships =
            decode_items(raw.relationships, "relationship", &mut malformed_relationships);
        Self {
            entities,
            relationships,
            malformed_entities,
            malformed_relationships,
        }
    }
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn total_count(&self) -> usize {
        self.entities.len() + self.relationships.len()
    }

    /// Warnings for entities that never decoded
    pub fn entity_rejections(&self) -> Vec<String> {
        self.malformed_entities
            .iter()
            .map(|m| format!("Rejected entity #{}: {}", m.index, m.error))
            .collect()
    }

    /// Warnings for relationships that never decoded
    pub fn relationship_rejections(&self) -> Vec<String> {
        self.malformed_relationships
            .iter()
            .map(|m| format!("Dropped relationship #{}: {}", m.index, m.error))
            .collect()
    }
}

/// Extraction collaborator
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction>;
}

/// LLM-backed extractor
#[derive(Clone)]
pub struct LlmExtractor {
    llm: Arc<dyn ChatCompletion>,
    prompt_log: Option<Arc<PromptLog>>,
}

impl LlmExtractor {
    pub fn new(llm: Arc<dyn ChatCompletion>) -> Self {
        Self {
            llm,
            prompt_log: None,
        }
    }

    pub fn with_prompt_log(mut self, log: Arc<PromptLog>) -> Self {
        self.prompt_log = Some(log);
        self
    }

    fn build_prompt(&self, text: &str) -> String {
        let types = EntityType::all()
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join("|");

        format!(
            r#"Extract every lore entity and relationship from the passage below.

PASSAGE:
"""
{text}
"""

Return JSON:
{{
    "entities": [
        {{
            "type": "{types}",
            "name": "entity name as written",
            "properties": {{"description": "one sentence", "...": "other facts stated in the passage"}},
            "aliases": ["other names used for it"],
            "confidence": 0.8
        }}
    ],
    "relationships": [
        {{
            "source": "source entity name",
            "target": "target entity name",
            "type": "controls|allied_with|located_in|member_of|participated_in|...",
            "properties": {{}}
        }}
    ]
}}"#,
            text = truncate_chars(text, MAX_INPUT_CHARS),
            types = types,
        )
    }
}

/// Parse a model response into an extraction
pub fn parse_extraction(response: &str) -> Result<Extraction> {
    let json = extract_json_from_response(response);
    serde_json::from_str(json).map_err(|e| {
        warn!(error = %e, "Failed to parse extraction response as JSON");
        Error::EntityExtractionFailed(format!("Invalid response: {}", e))
    })
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        if text.trim().is_empty() {
            return Ok(Extraction::default());
        }

        let prompt = self.build_prompt(text);
        if let Some(log) = &self.prompt_log {
            log.record(
                prompt_ids::EXTRACT_ENTITIES,
                EXTRACTION_PROMPT_VERSION,
                None,
                &prompt,
            );
        }

        let messages = vec![
            Message::system(EXTRACTION_SYSTEM_PROMPT),
            Message::user(prompt),
        ];
        let response = self.llm.complete(messages, true).await?;
        let extraction = parse_extraction(&response.content)?;

        info!(
            entities = extraction.entities.len(),
            relationships = extraction.relationships.len(),
            "Extracted lore from text"
        );

        Ok(extraction)
    }
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are a continuity editor for a fictional world. You read lore passages and record the named things they mention.

Guidelines:
1. Only extract factions, characters, locations, resources, and events
2. Keep names exactly as written; list alternative names as aliases
3. Record only facts the passage states, as properties
4. Every entity needs a short "description" property
5. Assign confidence based on how clearly the passage states the entity

Return valid JSON only, with no additional text or explanation."#;
