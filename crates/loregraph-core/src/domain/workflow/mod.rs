//! Consistency workflow
//!
//! A bounded generate → validate → retry loop with escalation to human
//! review when the iteration budget runs out.

pub mod collaborators;
pub mod controller;
pub mod generator;
pub mod retriever;
pub mod state;

pub use collaborators::{
    GeneratedLore, GenerationRequest, Generator, RetrievedContext, Retriever, parse_generated,
};
pub use controller::{DEFAULT_MAX_ITERATIONS, DEFAULT_STAGE_TIMEOUT, WorkflowController, WorkflowOutcome};
pub use generator::LlmGenerator;
pub use retriever::GraphRetriever;
pub use state::{WorkflowPhase, WorkflowState, after_retrieval, after_validation};
