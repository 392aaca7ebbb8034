//! Workflow state machine
//!
//! ```text
//! Init → Retrieving → Generating → Validating → Complete
//!            │            ▲            │
//!            ▼            │            ├──→ RequireHumanReview
//!          Failed         └── Retry ◄──┘
//! ```
//!
//! Transition decisions are pure functions so they can be tested without a
//! runtime. [`WorkflowState`] is owned by one session and only mutated by
//! the controller.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::knowledge::{CandidateSet, ValidationResult};
use crate::error::{Error, Result};

use super::collaborators::{GeneratedLore, RetrievedContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Init,
    Retrieving,
    Generating,
    Validating,
    /// Invalid result with budget left; next stop is Generating
    Retry,
    Complete,
    /// Budget exhausted without a valid result
    RequireHumanReview,
    /// Retrieval produced nothing to work with
    Failed,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Validating => "validating",
            Self::Retry => "retry",
            Self::Complete => "complete",
            Self::RequireHumanReview => "require_human_review",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::RequireHumanReview | Self::Failed)
    }

    /// Whether `next` is a legal successor of this phase
    ///
    /// Generating may skip Validating when the generator fails; that attempt
    /// is judged as an invalid result.
    pub fn can_transition_to(&self, next: WorkflowPhase) -> bool {
        use WorkflowPhase::*;
        matches!(
            (self, next),
            (Init, Retrieving)
                | (Retrieving, Generating)
                | (Retrieving, Failed)
                | (Generating, Validating)
                | (Generating, Retry)
                | (Generating, RequireHumanReview)
                | (Validating, Complete)
                | (Validating, Retry)
                | (Validating, RequireHumanReview)
                | (Retry, Generating)
        )
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Phase after retrieval: empty context is not remediable by regenerating
pub fn after_retrieval(has_context: bool) -> WorkflowPhase {
    if has_context {
        WorkflowPhase::Generating
    } else {
        WorkflowPhase::Failed
    }
}

/// Phase after judging an attempt
pub fn after_validation(is_valid: bool, iteration_count: u32, max_iterations: u32) -> WorkflowPhase {
    if is_valid {
        WorkflowPhase::Complete
    } else if iteration_count < max_iterations {
        WorkflowPhase::Retry
    } else {
        WorkflowPhase::RequireHumanReview
    }
}

/// Mutable state of one workflow session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub query: String,
    pub session_id: String,
    pub phase: WorkflowPhase,
    pub retrieved_context: Option<RetrievedContext>,
    /// Last successfully parsed generation
    pub generated_content: Option<GeneratedLore>,
    /// Candidates decomposed from `generated_content`
    pub candidates: Option<CandidateSet>,
    pub validation_result: Option<ValidationResult>,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub requires_human_review: bool,
    pub errors: Vec<String>,
    /// Every phase entered, in order
    pub history: Vec<WorkflowPhase>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            phase: WorkflowPhase::Init,
            retrieved_context: None,
            generated_content: None,
            candidates: None,
            validation_result: None,
            iteration_count: 0,
            max_iterations: max_iterations.max(1),
            requires_human_review: false,
            errors: Vec::new(),
            history: vec![WorkflowPhase::Init],
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: WorkflowPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition(
                self.phase.to_string(),
                next.to_string(),
            ));
        }

        if next == WorkflowPhase::Generating {
            self.iteration_count += 1;
        }
        if next == WorkflowPhase::RequireHumanReview {
            self.requires_human_review = true;
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }

        self.phase = next;
        self.history.push(next);
        Ok(())
    }

    /// End the session in `Failed` regardless of the current phase
    ///
    /// Only used when the controller itself hits an internal error.
    pub fn abort(&mut self, reason: impl Into<String>) {
        self.record_error(reason);
        self.phase = WorkflowPhase::Failed;
        self.history.push(WorkflowPhase::Failed);
        self.finished_at = Some(Utc::now());
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.phase == WorkflowPhase::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowPhase::*;

    #[test]
    fn test_after_validation() {
        assert_eq!(after_validation(true, 1, 3), Complete);
        assert_eq!(after_validation(true, 3, 3), Complete);
        assert_eq!(after_validation(false, 1, 3), Retry);
        assert_eq!(after_validation(false, 2, 3), Retry);
        assert_eq!(after_validation(false, 3, 3), RequireHumanReview);
    }

    #[test]
    fn test_after_retrieval() {
        assert_eq!(after_retrieval(true), Generating);
        assert_eq!(after_retrieval(false), Failed);
    }

    #[test]
    fn test_terminal_phases_have_no_successors() {
        let all = [
            Init,
            Retrieving,
            Generating,
            Validating,
            Retry,
            Complete,
            RequireHumanReview,
            Failed,
        ];
        for phase in all.iter().filter(|p| p.is_terminal()) {
            assert!(all.iter().all(|next| !phase.can_transition_to(*next)));
        }
        assert!(!Retry.can_transition_to(Validating));
        assert!(!Init.can_transition_to(Generating));
    }

    #[test]
    fn test_retry_loop_is_bounded_at_max_iterations() {
        let mut state = WorkflowState::new("Who controls the Ruby Mines?", "s-1", 3);
        state.transition(Retrieving).unwrap();

        let mut next = Generating;
        while !state.is_finished() {
            if next == Generating {
                state.transition(Generating).unwrap();
                state.transition(Validating).unwrap();
            }
            next = after_validation(false, state.iteration_count, state.max_iterations);
            state.transition(next).unwrap();
            if next == Retry {
                next = Generating;
            }
        }

        assert_eq!(state.phase, RequireHumanReview);
        assert_eq!(state.iteration_count, 3);
        assert!(state.requires_human_review);
        assert!(state.finished_at.is_some());
        assert!(!state.succeeded());
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut state = WorkflowState::new("q", "s-1", 3);
        let err = state.transition(Validating).unwrap_err();
        assert_eq!(err.code(), "E1001");
        assert_eq!(state.phase, Init);
        assert_eq!(state.history, vec![Init]);
    }

    #[test]
    fn test_generating_increments_iterations() {
        let mut state = WorkflowState::new("q", "s-1", 3);
        state.transition(Retrieving).unwrap();
        state.transition(Generating).unwrap();
        state.transition(Retry).unwrap();
        state.transition(Generating).unwrap();
        assert_eq!(state.iteration_count, 2);
        assert_eq!(state.history, vec![Init, Retrieving, Generating, Retry, Generating]);
    }

    #[test]
    fn test_zero_max_iterations_is_raised_to_one() {
        assert_eq!(WorkflowState::new("q", "s", 0).max_iterations, 1);
    }

    #[test]
    fn test_abort() {
        let mut state = WorkflowState::new("q", "s-1", 3);
        state.abort("boom");
        assert_eq!(state.phase, Failed);
        assert_eq!(state.errors, vec!["boom".to_string()]);
    }
}
