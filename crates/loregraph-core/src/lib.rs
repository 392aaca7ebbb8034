//! Loregraph Core Library
//!
//! This crate provides the core functionality for Loregraph, including:
//! - Entity canonicalization (normalized IDs, deduplication, confidence merge)
//! - Schema validation and contradiction detection against the lore graph
//! - Consistency scoring
//! - The generate → validate → retry workflow with human-review escalation
//! - LLM integration (OpenAI-compatible chat completions)
//! - Graph storage (in-memory store with JSON snapshots)

pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::knowledge::{
        CanonicalEntity, CanonicalRelationship, Canonicalizer, ConsistencyValidator,
        ContradictionDetector, EntityType, ValidationResult,
    };
    pub use crate::domain::workflow::{WorkflowController, WorkflowOutcome, WorkflowPhase};
    pub use crate::error::{Error, Result};
    pub use crate::storage::InMemoryGraphStore;
}
