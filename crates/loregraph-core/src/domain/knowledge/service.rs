//! Lore ingestion service
//!
//! Extract → classify → canonicalize → load. Also commits the output of a
//! successful workflow session to the graph.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::workflow::WorkflowOutcome;
use crate::error::{Error, Result};

use super::canonicalizer::{CanonicalizationResult, Canonicalizer};
use super::entity::CanonicalEntity;
use super::event::KnowledgeEvent;
use super::extractor::{Extraction, Extractor};
use super::relationship::CanonicalRelationship;
use super::repository::GraphWriter;

/// Summary of one ingestion or commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub entity_ids: Vec<String>,
    pub entities_written: usize,
    /// Entities that absorbed more than one mention
    pub entities_merged: usize,
    pub relationships_written: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl IngestionReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

pub struct IngestionService {
    extractor: Arc<dyn Extractor>,
    writer: Arc<dyn GraphWriter>,
    canonicalizer: Canonicalizer,
    events: Vec<KnowledgeEvent>,
}

impl IngestionService {
    pub fn new(extractor: Arc<dyn Extractor>, writer: Arc<dyn GraphWriter>) -> Self {
        Self {
            extractor,
            writer,
            canonicalizer: Canonicalizer::new(),
            events: Vec::new(),
        }
    }

    pub fn with_canonicalizer(mut self, canonicalizer: Canonicalizer) -> Self {
        self.canonicalizer = canonicalizer;
        self
    }

    /// Ingest narrative text
    ///
    /// An extractor failure is recorded in the report as zero extractions.
    pub async fn ingest(&mut self, text: &str) -> IngestionReport {
        let extraction = match self.extractor.extract(text).await {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(error = %e, "Extraction failed, ingesting nothing");
                return IngestionReport {
                    errors: vec![format!("Extraction failed: {}", e)],
                    ..Default::default()
                };
            }
        };
        self.ingest_extraction(extraction).await
    }

    /// Ingest an already extracted batch
    pub async fn ingest_extraction(&mut self, extraction: Extraction) -> IngestionReport {
        let mut rejections = extraction.entity_rejections();
        let mut dropped = extraction.relationship_rejections();

        let (classified, mut classify_rejections) = self.canonicalizer.classify(extraction.entities);
        rejections.append(&mut classify_rejections);
        self.events
            .extend(rejections.iter().map(KnowledgeEvent::entity_rejected));

        let result = self.canonicalizer.canonicalize(classified, extraction.relationships);
        dropped.extend(result.warnings.iter().cloned());
        self.events
            .extend(dropped.iter().map(KnowledgeEvent::relationship_dropped));

        let CanonicalizationResult {
            entities,
            relationships,
            ..
        } = result;

        let mut report = self.write(&entities, &relationships).await;
        report.warnings = rejections.into_iter().chain(dropped).collect();

        info!(
            entities = report.entities_written,
            merged = report.entities_merged,
            relationships = report.relationships_written,
            warnings = report.warnings.len(),
            errors = report.errors.len(),
            "Lore ingested"
        );
        report
    }

    /// Write a successful session's entities and relationships
    pub async fn commit(&mut self, outcome: &WorkflowOutcome) -> Result<IngestionReport> {
        if !outcome.success {
            return Err(Error::InvalidInput(format!(
                "session {} ended in {} and cannot be committed",
                outcome.session_id, outcome.phase
            )));
        }

        let report = self.write(&outcome.entities, &outcome.relationships).await;
        self.events.push(KnowledgeEvent::lore_committed(
            &outcome.session_id,
            report.entities_written,
            report.relationships_written,
        ));

        info!(
            session_id = %outcome.session_id,
            entities = report.entities_written,
            relationships = report.relationships_written,
            "Session lore committed"
        );
        Ok(report)
    }

    /// Upsert everything; a failed item is recorded and the rest still written
    async fn write(
        &mut self,
        entities: &[CanonicalEntity],
        relationships: &[CanonicalRelationship],
    ) -> IngestionReport {
        let mut report = IngestionReport::default();

        for entity in entities {
            match self.writer.upsert_entity(entity).await {
                Ok(()) => {
                    report.entities_written += 1;
                    report.entity_ids.push(entity.id.clone());
                    self.events.push(KnowledgeEvent::entity_canonicalized(entity));
                    if entity.merged_from.len() > 1 {
                        report.entities_merged += 1;
                        self.events.push(KnowledgeEvent::entities_merged(entity));
                    }
                }
                Err(e) => {
                    warn!(entity_id = %entity.id, error = %e, "Failed to write entity");
                    report
                        .errors
                        .push(format!("Failed to write {}: {}", entity.id, e));
                }
            }
        }

        for relationship in relationships {
            match self.writer.upsert_relationship(relationship).await {
                Ok(()) => report.relationships_written += 1,
                Err(e) => {
                    warn!(key = %relationship.key(), error = %e, "Failed to write relationship");
                    report
                        .errors
                        .push(format!("Failed to write {}: {}", relationship.key(), e));
                }
            }
        }

        report
    }

    /// Audit trail recorded so far
    pub fn events(&self) -> &[KnowledgeEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<KnowledgeEvent> {
        std::mem::take(&mut self.events)
    }
}
