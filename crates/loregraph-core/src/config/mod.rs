//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Loregraph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Never written out; a value read from a file fails validation
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Generation attempts per session before escalating to human review
    pub max_iterations: u32,
    /// Upper bound for any single collaborator call
    pub stage_timeout_secs: u64,
    /// Consistency score floor for a valid result
    pub min_consistency_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Extracted entities below this confidence are discarded before classification
    pub min_entity_confidence: f32,
    /// Graph snapshot file used by the CLI
    pub store_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            workflow: WorkflowConfig::default(),
            ingestion: IngestionConfig {
                min_entity_confidence: 0.0,
                store_path: None,
            },
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            stage_timeout_secs: 60,
            min_consistency_score: 0.8,
        }
    }
}

impl WorkflowConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("LOREGRAPH_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| opt.as_deref().map(redact))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

/// Mask all but the last four characters of a secret
fn redact(key: &str) -> String {
    if key.chars().count() <= 4 {
        return "***".to_string();
    }
    let mut tail: Vec<char> = key.chars().rev().take(4).collect();
    tail.reverse();
    format!("***{}", tail.into_iter().collect::<String>())
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("LOREGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("loregraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Default graph snapshot location when `ingestion.store_path` is unset
    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        match &self.ingestion.store_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::config_dir()?.join("graph.json")),
        }
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Invalid config file: {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if self.workflow.max_iterations == 0 {
            return Err(anyhow!("workflow.max_iterations must be at least 1"));
        }
        if self.workflow.stage_timeout_secs == 0 {
            return Err(anyhow!("workflow.stage_timeout_secs must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.workflow.min_consistency_score) {
            return Err(anyhow!(
                "workflow.min_consistency_score must be between 0.0 and 1.0"
            ));
        }
        if !(0.0..=1.0).contains(&self.ingestion.min_entity_confidence) {
            return Err(anyhow!(
                "ingestion.min_entity_confidence must be between 0.0 and 1.0"
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "llm.model" => Ok(self.llm.model.clone()),
            "llm.base_url" => Ok(self.llm.base_url.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            "workflow.max_iterations" => Ok(self.workflow.max_iterations.to_string()),
            "workflow.stage_timeout_secs" => Ok(self.workflow.stage_timeout_secs.to_string()),
            "workflow.min_consistency_score" => {
                Ok(self.workflow.min_consistency_score.to_string())
            }

            "ingestion.min_entity_confidence" => {
                Ok(self.ingestion.min_entity_confidence.to_string())
            }
            "ingestion.store_path" => Ok(self
                .ingestion
                .store_path
                .clone()
                .unwrap_or_else(|| "(default)".to_string())),

            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use LOREGRAPH_API_KEY or OPENAI_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `loregraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.model" => {
                self.llm.model = value.to_string();
            }
            "llm.base_url" => {
                self.llm.base_url = value.trim_end_matches('/').to_string();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            "workflow.max_iterations" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_iterations value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_iterations must be at least 1"));
                }
                self.workflow.max_iterations = max;
            }
            "workflow.stage_timeout_secs" => {
                let secs: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid stage_timeout_secs value: {}", value))?;
                if secs == 0 {
                    return Err(anyhow!("stage_timeout_secs must be at least 1"));
                }
                self.workflow.stage_timeout_secs = secs;
            }
            "workflow.min_consistency_score" => {
                let score: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid min_consistency_score value: {}", value))?;
                if !(0.0..=1.0).contains(&score) {
                    return Err(anyhow!("min_consistency_score must be between 0.0 and 1.0"));
                }
                self.workflow.min_consistency_score = score;
            }

            "ingestion.min_entity_confidence" => {
                let confidence: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid min_entity_confidence value: {}", value))?;
                if !(0.0..=1.0).contains(&confidence) {
                    return Err(anyhow!("min_entity_confidence must be between 0.0 and 1.0"));
                }
                self.ingestion.min_entity_confidence = confidence;
            }
            "ingestion.store_path" => {
                self.ingestion.store_path = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }

            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the LOREGRAPH_API_KEY or OPENAI_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `loregraph config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "llm.model",
            "llm.base_url",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "workflow.max_iterations",
            "workflow.stage_timeout_secs",
            "workflow.min_consistency_score",
            "ingestion.min_entity_confidence",
            "ingestion.store_path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.workflow.max_iterations, 3);
        assert_eq!(config.workflow.min_consistency_score, 0.8);
        assert_eq!(config.workflow.stage_timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_and_get_round_trip() {
        let mut config = Config::default();
        config.set("workflow.max_iterations", "5").unwrap();
        config.set("llm.base_url", "http://localhost:8080/v1/").unwrap();

        assert_eq!(config.get("workflow.max_iterations").unwrap(), "5");
        assert_eq!(config.get("llm.base_url").unwrap(), "http://localhost:8080/v1");
    }

    #[test]
    fn test_set_rejects_out_of_range_values() {
        let mut config = Config::default();
        assert!(config.set("workflow.max_iterations", "0").is_err());
        assert!(config.set("workflow.min_consistency_score", "1.5").is_err());
        assert!(config.set("llm.temperature", "3.0").is_err());
        assert!(config.set("ingestion.min_entity_confidence", "-0.1").is_err());
        assert!(config.set("nonexistent.key", "x").is_err());
    }

    #[test]
    fn test_api_key_cannot_be_stored() {
        let mut config = Config::default();
        assert!(config.set("llm.api_key", "sk-secret").is_err());

        config.llm.api_key = Some("sk-secret".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_skips_api_key() {
        let mut config = Config::default();
        config.ingestion.store_path = Some("/tmp/graph.json".to_string());

        let serialized = toml::to_string_pretty(&config).unwrap();
        assert!(!serialized.contains("api_key"));

        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.ingestion.store_path.as_deref(), Some("/tmp/graph.json"));
        assert_eq!(parsed.workflow.max_iterations, 3);
    }

    #[test]
    fn test_file_validation_matches_set() {
        let defaults = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(Config::from_toml(&defaults).is_ok());

        let zero_timeout = defaults.replace("stage_timeout_secs = 60", "stage_timeout_secs = 0");
        let err = Config::from_toml(&zero_timeout).unwrap_err();
        assert!(err.to_string().contains("stage_timeout_secs"));

        let mut config = Config::default();
        assert!(config.set("workflow.stage_timeout_secs", "0").is_err());
        config.workflow.stage_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_in_file_is_rejected() {
        let defaults = toml::to_string_pretty(&Config::default()).unwrap();
        let with_key = defaults.replacen("[llm]\n", "[llm]\napi_key = \"sk-secret\"\n", 1);
        assert_ne!(with_key, defaults);

        let err = Config::from_toml(&with_key).unwrap_err();
        assert!(err.to_string().contains("environment variables"));
    }

    #[test]
    fn test_redact_counts_characters() {
        assert_eq!(redact("sk-abcdef1234"), "***1234");
        assert_eq!(redact("sk-ключик"), "***ючик");
        assert_eq!(redact("ключ"), "***");
    }

    #[test]
    fn test_list_contains_all_sections() {
        let config = Config::default();
        let items = config.list().unwrap();
        let keys: Vec<&str> = items.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"llm.model"));
        assert!(keys.contains(&"workflow.max_iterations"));
        assert!(keys.contains(&"ingestion.store_path"));
    }
}
