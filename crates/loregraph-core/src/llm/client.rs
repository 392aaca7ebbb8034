//! OpenAI-compatible chat completions client
//!
//! Rate limits (HTTP 429) are retried with exponential backoff up to
//! [`MAX_RETRY_ATTEMPTS`]. Every other failure is returned to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::{ChatRequest, ChatResponse, LlmResponse, Message};

/// Maximum number of attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// Upper bound on a single backoff wait (in milliseconds)
const BACKOFF_CAP_MS: u64 = 30_000;

/// Something that can answer a chat conversation
///
/// [`LlmClient`] is the production implementation; extractors and
/// generators only depend on this trait.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: Vec<Message>, json_output: bool) -> Result<LlmResponse>;
}

#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the configured base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let mut config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .or_else(|| config.api_key.clone())
            .ok_or_else(|| Error::LLMError("API key is required".to_string()))?;

        if let Some(url) = self.base_url {
            config.base_url = url;
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            api_key,
        })
    }
}

impl LlmClient {
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new().config(config).api_key(api_key).build()
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn request(&self, messages: Vec<Message>, json_output: bool) -> ChatRequest {
        let request = ChatRequest::new(&self.config.model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        if json_output {
            request.with_json_output()
        } else {
            request
        }
    }

    /// Execute a chat request, backing off on rate limits
    async fn execute_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                result => return result,
            }
        }
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), &body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Failed to parse response: {}", e)))?;

        LlmResponse::from_chat_response(chat_response)
            .ok_or_else(|| Error::LLMError("Empty response from API".to_string()))
    }
}

#[async_trait]
impl ChatCompletion for LlmClient {
    async fn complete(&self, messages: Vec<Message>, json_output: bool) -> Result<LlmResponse> {
        let request = self.request(messages, json_output);
        let response = self.execute_request(&request).await?;
        debug!(
            model = %response.model,
            tokens = response.tokens_used,
            finish_reason = %response.finish_reason,
            "Chat completion received"
        );
        Ok(response)
    }
}

/// Map a non-success HTTP status to an error
fn error_for_status(status: u16, body: &str) -> Error {
    match status {
        401 => Error::LLMError(
            "Unauthorized: invalid API key. Set LOREGRAPH_API_KEY or OPENAI_API_KEY.".to_string(),
        ),
        429 => Error::RateLimited(extract_retry_after(body).unwrap_or(60)),
        400 => Error::LLMError(format!("Bad request: {}", body)),
        404 => Error::LLMError(format!("Model not found or endpoint unavailable: {}", body)),
        500..=599 => Error::LLMError(format!("Server error ({}): {}", status, body)),
        _ => Error::LLMError(format!("HTTP error {}: {}", status, body)),
    }
}

/// Backoff delay in milliseconds for the given attempt
fn calculate_backoff(attempt: u32, suggested_wait_secs: u64) -> u64 {
    let base = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let suggested = suggested_wait_secs.saturating_mul(1000);
    base.max(suggested).min(BACKOFF_CAP_MS)
}

/// Read a `retry_after` hint from an error body
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .or_else(|| json.get("error").and_then(|e| e.get("retry_after")))
        .and_then(|v| v.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key: None,
            model: "test/model".to_string(),
            base_url: "https://example.com/v1/".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("test-key")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.model(), "test/model");
        assert_eq!(client.base_url(), "https://example.com/v1");
    }

    #[test]
    fn test_builder_requires_api_key() {
        assert!(LlmClient::builder().config(test_config()).build().is_err());
    }

    #[test]
    fn test_builder_base_url_override() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("k")
            .base_url("http://localhost:11434/v1")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = LlmClient::new(test_config(), "secret-key").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("test/model"));
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn test_request_uses_config() {
        let client = LlmClient::new(test_config(), "k").unwrap();
        let request = client.request(vec![Message::user("hi")], true);
        assert_eq!(request.temperature, Some(0.2));
        assert_eq!(request.max_tokens, Some(1024));
        assert!(request.response_format.is_some());
    }

    #[test]
    fn test_calculate_backoff() {
        assert_eq!(calculate_backoff(1, 0), BACKOFF_BASE_MS);
        assert_eq!(calculate_backoff(2, 0), BACKOFF_BASE_MS * 2);
        assert_eq!(calculate_backoff(1, 5), 5000);
        assert_eq!(calculate_backoff(1, 600), BACKOFF_CAP_MS);
    }

    #[test]
    fn test_error_for_status() {
        assert!(matches!(error_for_status(429, r#"{"retry_after": 7}"#), Error::RateLimited(7)));
        assert!(matches!(error_for_status(429, ""), Error::RateLimited(60)));
        assert!(matches!(error_for_status(401, ""), Error::LLMError(_)));
        assert!(error_for_status(503, "down").to_string().contains("503"));
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(extract_retry_after(r#"{"error": {"retry_after": 60}}"#), Some(60));
        assert_eq!(extract_retry_after(r#"{"message": "rate limited"}"#), None);
        assert_eq!(extract_retry_after("not json"), None);
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }
}
