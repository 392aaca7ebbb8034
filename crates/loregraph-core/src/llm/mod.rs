//! LLM integration
//!
//! - OpenAI-compatible chat completions client with rate-limit backoff
//! - JSON extraction helpers for model responses
//! - Append-only prompt log

mod client;
mod json;
mod prompt_log;
mod types;

pub use client::{ChatCompletion, LlmClient, LlmClientBuilder};
pub use json::{extract_json_from_response, truncate_chars};
pub use prompt_log::{PromptLog, PromptRecord, prompt_ids};
pub use types::{ChatRequest, ChatResponse, Choice, FinishReason, LlmResponse, Message, MessageRole, Usage};
