//! Workflow controller
//!
//! Drives one session through retrieve → generate → validate, retrying with
//! validation feedback until the result is valid or the iteration budget is
//! spent. Every collaborator call runs under a per-stage timeout, and any
//! collaborator failure is recorded and judged as an invalid attempt.
//! [`WorkflowController::run_workflow`] never returns an error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::domain::knowledge::{
    CanonicalEntity, CanonicalRelationship, Canonicalizer, ConsistencyValidator, IterationContext,
    KnowledgeEvent, ValidationResult,
};
use crate::error::{Error, Result};

use super::collaborators::{GenerationRequest, Generator, RetrievedContext, Retriever, parse_generated};
use super::state::{WorkflowPhase, WorkflowState, after_retrieval, after_validation};

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Everything a session produced, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub session_id: String,
    pub success: bool,
    pub phase: WorkflowPhase,
    /// Generated text of the last parsed attempt
    pub response: Option<String>,
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
    pub validation_result: Option<ValidationResult>,
    pub iterations: u32,
    pub requires_human_review: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub context: Option<RetrievedContext>,
    #[serde(default)]
    pub events: Vec<KnowledgeEvent>,
}

impl WorkflowOutcome {
    fn from_state(state: WorkflowState, events: Vec<KnowledgeEvent>) -> Self {
        let success = state.succeeded();
        let (entities, relationships, warnings) = match state.candidates {
            Some(candidates) => (
                candidates.entities,
                candidates.relationships,
                candidates.warnings,
            ),
            None => Default::default(),
        };

        Self {
            session_id: state.session_id,
            success,
            phase: state.phase,
            response: state.generated_content.map(|lore| lore.text),
            entities,
            relationships,
            validation_result: state.validation_result,
            iterations: state.iteration_count,
            requires_human_review: state.requires_human_review,
            errors: state.errors,
            warnings,
            context: state.retrieved_context,
            events,
        }
    }
}

pub struct WorkflowController {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    validator: ConsistencyValidator,
    canonicalizer: Canonicalizer,
    max_iterations: u32,
    stage_timeout: Duration,
}

impl std::fmt::Debug for WorkflowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowController")
            .field("max_iterations", &self.max_iterations)
            .field("stage_timeout", &self.stage_timeout)
            .finish_non_exhaustive()
    }
}

impl WorkflowController {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        validator: ConsistencyValidator,
    ) -> Self {
        Self {
            retriever,
            generator,
            validator,
            canonicalizer: Canonicalizer::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    /// Apply iteration budget, stage timeout, and score floor from config
    pub fn with_config(self, config: &WorkflowConfig) -> Self {
        let validator = self.validator.clone().with_min_score(config.min_consistency_score);
        Self {
            validator,
            ..self
        }
        .with_max_iterations(config.max_iterations)
        .with_stage_timeout(config.stage_timeout())
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run one consistency session
    pub async fn run_workflow(&self, query: &str, session_id: Option<String>) -> WorkflowOutcome {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = WorkflowState::new(query, session_id, self.max_iterations);
        let mut events = Vec::new();

        info!(session_id = %state.session_id, max_iterations = state.max_iterations, "Starting workflow session");

        if let Err(e) = self.drive(&mut state, &mut events).await {
            error!(session_id = %state.session_id, error = %e, "Workflow aborted");
            state.abort(format!("Internal workflow error: {}", e));
        }

        events.push(KnowledgeEvent::session_finished(
            &state.session_id,
            state.phase.as_str(),
            state.iteration_count,
            state.succeeded(),
        ));

        info!(
            session_id = %state.session_id,
            phase = %state.phase,
            iterations = state.iteration_count,
            errors = state.errors.len(),
            "Workflow session finished"
        );

        WorkflowOutcome::from_state(state, events)
    }

    async fn drive(&self, state: &mut WorkflowState, events: &mut Vec<KnowledgeEvent>) -> Result<()> {
        state.transition(WorkflowPhase::Retrieving)?;

        let context = match self.stage("retrieving", self.retriever.retrieve(&state.query)).await {
            Ok(context) => context,
            Err(e) => {
                warn!(session_id = %state.session_id, error = %e, "Retrieval failed");
                state.record_error(format!("Retrieval failed: {}", e));
                RetrievedContext::empty()
            }
        };

        let next = after_retrieval(!context.is_empty());
        if next == WorkflowPhase::Failed && state.errors.is_empty() {
            state.record_error(format!("No context found for query '{}'", state.query));
        }
        debug!(
            session_id = %state.session_id,
            entities = context.entities.len(),
            documents = context.documents.len(),
            relevance = context.relevance_score,
            "Context retrieved"
        );
        state.retrieved_context = Some(context);
        state.transition(next)?;

        while state.phase == WorkflowPhase::Generating {
            let result = self.attempt(state, events).await?;
            let next = after_validation(result.is_valid, state.iteration_count, state.max_iterations);
            state.validation_result = Some(result);
            state.transition(next)?;

            match next {
                WorkflowPhase::Retry => {
                    info!(session_id = %state.session_id, iteration = state.iteration_count, "Retrying generation");
                    state.transition(WorkflowPhase::Generating)?;
                }
                WorkflowPhase::RequireHumanReview => {
                    warn!(
                        session_id = %state.session_id,
                        iterations = state.iteration_count,
                        "Iteration budget exhausted, escalating to human review"
                    );
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// One generate + validate attempt; collaborator failures become an invalid result
    async fn attempt(
        &self,
        state: &mut WorkflowState,
        events: &mut Vec<KnowledgeEvent>,
    ) -> Result<ValidationResult> {
        let iteration = state.iteration_count;
        let ctx = IterationContext::new(iteration, state.max_iterations);

        let raw = {
            let empty = RetrievedContext::empty();
            let request = GenerationRequest {
                session_id: &state.session_id,
                query: &state.query,
                context: state.retrieved_context.as_ref().unwrap_or(&empty),
                iteration,
                previous: state.validation_result.as_ref(),
            };
            self.stage("generating", self.generator.generate(&request)).await
        };

        let lore = match raw.and_then(|raw| parse_generated(&raw)) {
            Ok(lore) => lore,
            Err(e) => {
                warn!(
                    session_id = %state.session_id,
                    iteration,
                    code = e.code(),
                    collaborator = e.is_collaborator_failure(),
                    error = %e,
                    "Generation failed"
                );
                state.record_error(format!("Iteration {}: generation failed: {}", iteration, e));
                return Ok(ValidationResult::failed(
                    format!("Generation failed: {}", e),
                    ctx,
                ));
            }
        };

        state.transition(WorkflowPhase::Validating)?;

        let candidates = self
            .canonicalizer
            .decompose_candidates(lore.entities.clone(), lore.relationships.clone());
        state.generated_content = Some(lore);

        let validated = self
            .stage("validating", async {
                Ok::<_, Error>(self.validator.validate_candidates(&candidates, ctx).await)
            })
            .await;
        state.candidates = Some(candidates);

        let result = match validated {
            Ok(result) => result,
            Err(e) => {
                warn!(session_id = %state.session_id, iteration, error = %e, "Validation failed");
                state.record_error(format!("Iteration {}: validation failed: {}", iteration, e));
                ValidationResult::failed(format!("Validation failed: {}", e), ctx)
            }
        };

        for contradiction in &result.contradictions {
            events.push(KnowledgeEvent::contradiction_detected(&state.session_id, contradiction));
        }

        Ok(result)
    }

    /// Run a collaborator call under the stage timeout
    async fn stage<T, F>(&self, name: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.stage_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::StageTimeout(
                name.to_string(),
                self.stage_timeout.as_secs(),
            )),
        }
    }
}
