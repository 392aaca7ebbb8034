//! Append-only prompt log
//!
//! Every prompt an LLM collaborator renders is recorded here under a stable
//! prompt ID and version. Records are never edited or removed. The log can
//! optionally mirror each record to a JSONL file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Stable identifiers for the prompts this crate renders
pub mod prompt_ids {
    pub const EXTRACT_ENTITIES: &str = "extract_entities";
    pub const GENERATE_LORE: &str = "generate_lore";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub record_id: Uuid,
    pub prompt_id: String,
    pub version: u32,
    pub session_id: Option<String>,
    pub rendered_chars: usize,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct Arena {
    records: Vec<PromptRecord>,
    by_prompt: HashMap<String, Vec<usize>>,
}

#[derive(Default)]
pub struct PromptLog {
    arena: Mutex<Arena>,
    file: Mutex<Option<File>>,
}

impl std::fmt::Debug for PromptLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptLog").field("records", &self.len()).finish()
    }
}

impl PromptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror records to a JSONL file, creating it if needed
    pub fn with_file(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            arena: Mutex::default(),
            file: Mutex::new(Some(file)),
        })
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one rendered prompt
    pub fn record(
        &self,
        prompt_id: &str,
        version: u32,
        session_id: Option<&str>,
        rendered: &str,
    ) -> PromptRecord {
        let record = PromptRecord {
            record_id: Uuid::new_v4(),
            prompt_id: prompt_id.to_string(),
            version,
            session_id: session_id.map(str::to_string),
            rendered_chars: rendered.chars().count(),
            recorded_at: Utc::now(),
        };

        {
            let mut arena = self.arena();
            let index = arena.records.len();
            arena.records.push(record.clone());
            arena
                .by_prompt
                .entry(record.prompt_id.clone())
                .or_default()
                .push(index);
        }

        self.append_to_file(&record);
        debug!(prompt_id, version, chars = record.rendered_chars, "Prompt recorded");
        record
    }

    fn append_to_file(&self, record: &PromptRecord) {
        let mut guard = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(file) = guard.as_mut() {
            let written = serde_json::to_string(record)
                .map_err(std::io::Error::from)
                .and_then(|json| writeln!(file, "{}", json));
            if let Err(e) = written {
                warn!(error = %e, "Failed to append prompt record");
            }
        }
    }

    /// All records for a prompt ID, oldest first
    pub fn history(&self, prompt_id: &str) -> Vec<PromptRecord> {
        let arena = self.arena();
        arena
            .by_prompt
            .get(prompt_id)
            .map(|indices| indices.iter().map(|&i| arena.records[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, prompt_id: &str) -> Option<PromptRecord> {
        let arena = self.arena();
        let &index = arena.by_prompt.get(prompt_id)?.last()?;
        Some(arena.records[index].clone())
    }

    pub fn for_session(&self, session_id: &str) -> Vec<PromptRecord> {
        self.arena()
            .records
            .iter()
            .filter(|r| r.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.arena().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
