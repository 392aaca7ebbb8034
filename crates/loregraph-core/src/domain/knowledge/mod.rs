//! Lore knowledge domain
//!
//! Turns free-form extraction output into canonical graph entities and judges
//! new lore against what the graph already holds:
//!
//! - **Canonicalization**: classify, normalize, deduplicate and merge mentions
//! - **Schema validation**: per-type required fields and value kinds
//! - **Contradiction detection**: compare new claims against stored facts
//! - **Consistency scoring**: one verdict per batch of candidates
//! - **Ingestion**: extract → canonicalize → load, plus session commits
//!
//! ## Pipeline
//!
//! ```text
//! text ─→ Extractor ─→ Extraction ─→ Canonicalizer ─→ CanonicalizationResult
//!                                         │                    │
//!                                  SchemaRegistry        GraphWriter (ingest)
//!
//! CandidateSet ─→ ConsistencyValidator ─→ ValidationResult
//!                        │
//!               ContradictionDetector ─→ GraphLookup
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use loregraph_core::domain::knowledge::{Canonicalizer, ExtractedEntity, Extraction};
//!
//! let extraction = Extraction {
//!     entities: vec![
//!         ExtractedEntity::new("faction", "Crimson Empire")
//!             .with_property("description", "An empire")
//!             .with_confidence(0.9),
//!         ExtractedEntity::new("faction", "crimson empire")
//!             .with_property("description", "A sprawling empire")
//!             .with_confidence(0.4),
//!     ],
//!     ..Default::default()
//! };
//!
//! let result = Canonicalizer::new().canonicalize_extraction(extraction);
//! assert_eq!(result.entities[0].id, "faction:crimson_empire");
//! ```

mod canonicalizer;
mod contradiction;
mod entity;
mod event;
mod extractor;
mod relationship;
mod repository;
mod schema;
mod service;
mod validator;

pub use canonicalizer::{CandidateSet, CanonicalizationResult, Canonicalizer};
pub use contradiction::{
    ConflictType, Contradiction, ContradictionCheck, ContradictionDetector, IGNORED_FIELDS,
};
pub use entity::{
    CanonicalEntity, ClassifiedEntity, EntityType, ExtractedEntity, ID_SEPARATOR, Properties,
    canonical_id, normalize_name,
};
pub use event::KnowledgeEvent;
pub use extractor::{
    EXTRACTION_PROMPT_VERSION, Extraction, Extractor, LlmExtractor, MalformedItem, parse_extraction,
};
pub use relationship::{CanonicalRelationship, RawRelationshipMention, normalize_relationship_type};
pub use repository::{GraphLookup, GraphWriter};
pub use schema::{EntitySchema, FieldKind, FieldSpec, SchemaRegistry, SchemaViolation, schema_for};
pub use service::{IngestionReport, IngestionService};
pub use validator::{
    ConsistencyValidator, DEFAULT_MIN_SCORE, IterationContext, ValidationResult, consistency_score,
};
