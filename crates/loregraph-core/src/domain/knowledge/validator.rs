//! Consistency validator
//!
//! Combines schema validation and contradiction detection into one verdict.
//! Each candidate entity contributes two checks (schema and contradiction);
//! the consistency score is the fraction of those checks that passed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::canonicalizer::CandidateSet;
use super::contradiction::{Contradiction, ContradictionCheck, ContradictionDetector};
use super::entity::CanonicalEntity;
use super::schema::{SchemaRegistry, SchemaViolation};

/// Default score floor for a valid result
pub const DEFAULT_MIN_SCORE: f64 = 0.8;

/// Retry position supplied by the workflow controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationContext {
    pub iteration_count: u32,
    pub max_iterations: u32,
}

impl IterationContext {
    pub fn new(iteration_count: u32, max_iterations: u32) -> Self {
        Self {
            iteration_count,
            max_iterations,
        }
    }

    /// A one-shot validation outside any retry loop
    pub fn single_pass() -> Self {
        Self::new(1, 1)
    }

    pub fn has_budget(&self) -> bool {
        self.iteration_count < self.max_iterations
    }
}

/// Verdict of one validation pass
///
/// Produced fresh on every pass and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub schema_compliant: bool,
    pub consistency_score: f64,
    pub schema_violations: Vec<SchemaViolation>,
    pub contradictions: Vec<Contradiction>,
    pub suggested_fixes: Vec<String>,
    pub requires_revision: bool,
    /// Entities whose contradiction check could not run
    #[serde(default)]
    pub unverified: Vec<String>,
}

impl ValidationResult {
    /// Result for a pass that never reached validation (collaborator failure)
    pub fn failed(reason: impl Into<String>, ctx: IterationContext) -> Self {
        Self {
            is_valid: false,
            schema_compliant: false,
            consistency_score: 0.0,
            schema_violations: Vec::new(),
            contradictions: Vec::new(),
            suggested_fixes: vec![reason.into()],
            requires_revision: ctx.has_budget(),
            unverified: Vec::new(),
        }
    }

    /// Detailed feedback for the next generation attempt
    pub fn feedback(&self) -> String {
        let mut lines = Vec::new();
        for violation in &self.schema_violations {
            lines.push(format!("- Schema: {}", violation));
        }
        for contradiction in &self.contradictions {
            lines.push(format!(
                "- Contradiction: you claimed {} but the established fact is {}",
                contradiction.new_claim, contradiction.existing_fact
            ));
        }
        for id in &self.unverified {
            lines.push(format!("- Unverified: {} could not be checked", id));
        }
        if lines.is_empty() {
            lines.extend(self.suggested_fixes.iter().map(|fix| format!("- {}", fix)));
        }
        lines.join("\n")
    }
}

/// Fraction of passed checks, rounded to two decimals
///
/// An empty pass scores 1.0. Issues beyond the number of checks floor at 0.
pub fn consistency_score(total_checks: usize, total_issues: usize) -> f64 {
    if total_checks == 0 {
        return 1.0;
    }
    let passed = total_checks.saturating_sub(total_issues) as f64;
    (passed / total_checks as f64 * 100.0).round() / 100.0
}

#[derive(Debug, Clone)]
pub struct ConsistencyValidator {
    registry: SchemaRegistry,
    detector: ContradictionDetector,
    min_score: f64,
}

impl ConsistencyValidator {
    pub fn new(detector: ContradictionDetector) -> Self {
        Self {
            registry: SchemaRegistry::new(),
            detector,
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score.clamp(0.0, 1.0);
        self
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    /// Validate candidate entities
    pub async fn validate(
        &self,
        candidates: &[CanonicalEntity],
        ctx: IterationContext,
    ) -> ValidationResult {
        self.run(candidates, Vec::new(), ctx).await
    }

    /// Validate a decomposed candidate set
    ///
    /// Rejected candidates (unmapped type, no name) count as entities that
    /// failed their schema check.
    pub async fn validate_candidates(
        &self,
        candidates: &CandidateSet,
        ctx: IterationContext,
    ) -> ValidationResult {
        self.run(&candidates.entities, candidates.rejected.clone(), ctx)
            .await
    }

    async fn run(
        &self,
        candidates: &[CanonicalEntity],
        rejected: Vec<SchemaViolation>,
        ctx: IterationContext,
    ) -> ValidationResult {
        let entity_count = candidates.len() + rejected.len();
        let mut schema_violations = rejected;
        let mut contradictions = Vec::new();
        let mut unverified = Vec::new();

        for entity in candidates {
            let violations = self.registry.validate(entity.entity_type, &entity.properties);
            schema_violations.extend(violations.into_iter().map(|v| v.qualified(&entity.id)));
        }

        for entity in candidates {
            match self.detector.check(entity).await {
                ContradictionCheck::Unverifiable(_) => unverified.push(entity.id.clone()),
                check => contradictions.extend_from_slice(check.contradictions()),
            }
        }

        // Unverifiable checks count neither as passes nor as issues
        let total_checks = 2 * entity_count - unverified.len();
        let total_issues = schema_violations.len() + contradictions.len();
        let score = consistency_score(total_checks, total_issues);

        let schema_compliant = schema_violations.is_empty();
        let is_valid = schema_compliant
            && contradictions.is_empty()
            && unverified.is_empty()
            && score >= self.min_score;
        let requires_revision = !is_valid && ctx.has_budget();

        let suggested_fixes = suggest_fixes(
            schema_violations.len(),
            contradictions.len(),
            unverified.len(),
            score,
            self.min_score,
        );

        debug!(
            entities = entity_count,
            total_checks, total_issues, "Validation checks counted"
        );
        info!(
            iteration = ctx.iteration_count,
            score,
            is_valid,
            violations = schema_violations.len(),
            contradictions = contradictions.len(),
            unverified = unverified.len(),
            "Validation pass complete"
        );

        ValidationResult {
            is_valid,
            schema_compliant,
            consistency_score: score,
            schema_violations,
            contradictions,
            suggested_fixes,
            requires_revision,
            unverified,
        }
    }
}

fn plural(count: usize, one: &str, many: &str) -> String {
    format!("{} {}", count, if count == 1 { one } else { many })
}

fn suggest_fixes(
    violations: usize,
    contradictions: usize,
    unverified: usize,
    score: f64,
    min_score: f64,
) -> Vec<String> {
    let mut fixes = Vec::new();
    if violations > 0 {
        fixes.push(format!(
            "Fix {} so every entity matches its type schema",
            plural(violations, "schema violation", "schema violations")
        ));
    }
    if contradictions > 0 {
        fixes.push(format!(
            "Resolve {} with established lore",
            plural(contradictions, "contradiction", "contradictions")
        ));
    }
    if unverified > 0 {
        fixes.push(format!(
            "Re-run validation for {} once the graph store is reachable",
            plural(unverified, "unverified entity", "unverified entities")
        ));
    }
    if score < min_score {
        fixes.push(format!(
            "Raise the consistency score from {:.2} to at least {:.2}",
            score, min_score
        ));
    }
    fixes
}
