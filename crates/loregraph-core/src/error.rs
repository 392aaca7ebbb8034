//! Error types for Loregraph

use thiserror::Error;

/// Result type alias using Loregraph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Loregraph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Entity '{0}' not found in the lore graph.")]
    EntityNotFound(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `loregraph config get llm.api_key`.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    // Graph store errors (E400-E499)
    #[error("Graph store unavailable: {0}")]
    GraphStoreUnavailable(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Pipeline errors (E900-E999)
    #[error("Entity extraction failed: {0}")]
    EntityExtractionFailed(String),

    #[error("Generated content could not be parsed: {0}")]
    GenerationParseFailed(String),

    #[error("Context retrieval failed: {0}")]
    ContextRetrievalFailed(String),

    // Workflow errors (E1000-E1099)
    #[error("Stage '{0}' timed out after {1} seconds")]
    StageTimeout(String, u64),

    #[error("Invalid workflow transition from {0} to {1}")]
    InvalidTransition(String, String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntityNotFound(_) => "E001",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::GraphStoreUnavailable(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Serialization(_) => "E801",
            Self::EntityExtractionFailed(_) => "E900",
            Self::GenerationParseFailed(_) => "E901",
            Self::ContextRetrievalFailed(_) => "E902",
            Self::StageTimeout(..) => "E1000",
            Self::InvalidTransition(..) => "E1001",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("Set LOREGRAPH_API_KEY or OPENAI_API_KEY".to_string()),
            Self::StageTimeout(..) => {
                Some("loregraph config set workflow.stage_timeout_secs 120".to_string())
            }
            Self::GraphStoreUnavailable(_) => Some("loregraph stats".to_string()),
            _ => None,
        }
    }

    /// Whether this error came from an external collaborator (LLM, graph store, network)
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::LLMError(_)
                | Self::RateLimited(_)
                | Self::GraphStoreUnavailable(_)
                | Self::EntityExtractionFailed(_)
                | Self::ContextRetrievalFailed(_)
                | Self::StageTimeout(..)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timeout_error() {
        let error = Error::StageTimeout("generating".to_string(), 30);
        assert_eq!(error.code(), "E1000");
        assert!(error.to_string().contains("generating"));
        assert!(error.to_string().contains("30"));
        assert!(error.suggestion().is_some());
        assert!(error.is_collaborator_failure());
    }

    #[test]
    fn test_generation_parse_failed_is_not_collaborator_failure() {
        let error = Error::GenerationParseFailed("expected value".to_string());
        assert_eq!(error.code(), "E901");
        assert_eq!(error.suggestion(), None);
        assert!(!error.is_collaborator_failure());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let error: Error = parse.unwrap_err().into();
        assert_eq!(error.code(), "E801");
    }

    #[test]
    fn test_graph_store_unavailable() {
        let error = Error::GraphStoreUnavailable("connection refused".to_string());
        assert_eq!(error.code(), "E400");
        assert!(error.to_string().contains("connection refused"));
    }
}
