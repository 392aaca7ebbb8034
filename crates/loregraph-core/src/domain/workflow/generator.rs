//! LLM-backed lore generation

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::domain::knowledge::EntityType;
use crate::error::Result;
use crate::llm::{ChatCompletion, FinishReason, Message, PromptLog, prompt_ids, truncate_chars};

use super::collaborators::{GenerationRequest, Generator};

/// Version of the generation prompt recorded in the prompt log
pub const GENERATION_PROMPT_VERSION: u32 = 1;

const MAX_CONTEXT_CHARS: usize = 8_000;

#[derive(Clone)]
pub struct LlmGenerator {
    llm: Arc<dyn ChatCompletion>,
    prompt_log: Option<Arc<PromptLog>>,
}

impl LlmGenerator {
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

    fn build_prompt(&self, request: &GenerationRequest<'_>) -> String {
        let types = EntityType::all()
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join("|");

        let mut prompt = format!(
            r#"ESTABLISHED LORE:
{context}

REQUEST:
{query}
"#,
            context = truncate_chars(&request.context.render(), MAX_CONTEXT_CHARS),
            query = request.query,
        );

        if let Some(previous) = request.previous {
            prompt.push_str(&format!(
                r#"
Your previous answer (attempt {attempt}) was rejected by the continuity check:
{feedback}
Fix every issue listed above. Do not change established facts.
"#,
                attempt = request.iteration.saturating_sub(1),
                feedback = previous.feedback(),
            ));
        }

        prompt.push_str(&format!(
            r#"
Return JSON:
{{
    "text": "your answer as prose",
    "entities": [
        {{"type": "{types}", "name": "entity name", "properties": {{"description": "one sentence", "...": "facts your answer asserts"}}}}
    ],
    "relationships": [
        {{"source": "entity name", "target": "entity name", "type": "controls|allied_with|..."}}
    ],
    "confidence": 0.8,
    "reasoning": "how the answer follows from the established lore"
}}"#
        ));

        prompt
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let prompt = self.build_prompt(request);
        if let Some(log) = &self.prompt_log {
            log.record(
                prompt_ids::GENERATE_LORE,
                GENERATION_PROMPT_VERSION,
                Some(request.session_id),
                &prompt,
            );
        }

        let messages = vec![Message::system(GENERATION_SYSTEM_PROMPT), Message::user(prompt)];
        let response = self.llm.complete(messages, true).await?;

        if response.finish_reason == FinishReason::Length {
            debug!(session_id = request.session_id, "Generation hit the token limit");
        }
        info!(
            session_id = request.session_id,
            iteration = request.iteration,
            tokens = response.tokens_used,
            "Lore generated"
        );

        Ok(response.content)
    }
}

const GENERATION_SYSTEM_PROMPT: &str = r#"You write lore for a shared fictional world. Established lore is canon: never contradict it.

Guidelines:
1. Answer the request using the established lore
2. List every entity your answer mentions, with the facts your answer asserts about it
3. Use entity names exactly as they appear in the established lore
4. Every entity needs a short "description" property
5. When the lore is silent, you may invent details, but say so in "reasoning"

Return valid JSON only, with no additional text or explanation."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::{IterationContext, ValidationResult};
    use crate::domain::workflow::collaborators::RetrievedContext;
    use crate::llm::LlmResponse;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<Vec<Message>>>);

    #[async_trait]
    impl ChatCompletion for Recording {
        async fn complete(&self, messages: Vec<Message>, _: bool) -> Result<LlmResponse> {
            self.0.lock().unwrap().push(messages);
            Ok(LlmResponse::text(r#"{"text": "ok"}"#))
        }
    }

    fn context() -> RetrievedContext {
        RetrievedContext {
            documents: vec!["Ruby Mines (location): controlling_faction is Crimson Empire.".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_records_prompt_and_returns_raw_text() {
        let llm = Arc::new(Recording::default());
        let log = Arc::new(PromptLog::new());
        let generator = LlmGenerator::new(llm.clone()).with_prompt_log(log.clone());
        let context = context();

        let raw = generator
            .generate(&GenerationRequest {
                session_id: "s-1",
                query: "Who controls the Ruby Mines?",
                context: &context,
                iteration: 1,
                previous: None,
            })
            .await
            .unwrap();

        assert_eq!(raw, r#"{"text": "ok"}"#);
        assert_eq!(log.for_session("s-1").len(), 1);
        let sent = llm.0.lock().unwrap();
        assert!(sent[0][1].content.contains("controlling_faction is Crimson Empire"));
        assert!(!sent[0][1].content.contains("rejected"));
    }

    #[test]
    fn test_retry_prompt_includes_feedback() {
        let generator = LlmGenerator::new(Arc::new(Recording::default()));
        let context = context();
        let previous = ValidationResult::failed("Generation failed: timeout", IterationContext::new(1, 3));

        let prompt = generator.build_prompt(&GenerationRequest {
            session_id: "s-1",
            query: "q",
            context: &context,
            iteration: 2,
            previous: Some(&previous),
        });

        assert!(prompt.contains("attempt 1"));
        assert!(prompt.contains("Generation failed: timeout"));
    }
}
