//! Talk2Publish configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::Stage;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Workflow engine tuning
    pub workflow: WorkflowConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that the LLM API key variable is set. Call this before building
    /// a real client so failures name the missing variable.
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.llm.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.llm.api_key_env
            ));
        }
        if self.workflow.collaborator_timeout_ms == 0 {
            return Err(eyre::eyre!("workflow.collaborator-timeout-ms must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration
    ///
    /// An explicit path must load. Otherwise the first readable candidate
    /// wins: `./.talk2publish.yml`, then the user config directory. A broken
    /// candidate is logged and skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::from_yaml_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates().into_iter().filter(|p| p.exists()) {
            match Self::from_yaml_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %candidate.display(), error = %e, "Config::load: skipping unreadable config"),
            }
        }

        tracing::info!("Config::load: no config file, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    /// Implicit config locations, highest priority first
    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".talk2publish.yml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("talk2publish").join("talk2publish.yml"));
        }
        paths
    }

    fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_yaml::from_str::<Self>(&text).context("Failed to parse config file")?;
        tracing::info!(path = %path.display(), "Config::load: loaded");
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// HTTP request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).context(format!("Environment variable {} is not set", self.api_key_env))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 16384,
            timeout_ms: 300_000,
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Automatic retries for a failing delegate before surfacing the error
    #[serde(rename = "delegate-retries")]
    pub delegate_retries: u32,

    /// Deadline for a single collaborator call in milliseconds
    #[serde(rename = "collaborator-timeout-ms")]
    pub collaborator_timeout_ms: u64,

    /// Conversation turns per stage before the delegate must finalize
    #[serde(rename = "max-turns")]
    pub max_turns: u32,

    /// Stages whose output needs an explicit author decision before advancing
    #[serde(rename = "review-stages")]
    pub review_stages: Vec<Stage>,

    /// Run the writer as soon as a chapter's clarifications are resolved
    #[serde(rename = "auto-draft")]
    pub auto_draft: bool,

    /// Topic coverage judge used by gap analysis
    #[serde(rename = "gap-classifier")]
    pub gap_classifier: ClassifierKind,
}

/// Which topic classifier backs gap analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Ask the LLM which planned topics a text covers
    #[default]
    Llm,
    /// Whole-word keyword matching, no network
    Keyword,
}

impl WorkflowConfig {
    /// Collaborator deadline as a Duration
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Whether completing `stage` raises a review interrupt
    pub fn reviews(&self, stage: Stage) -> bool {
        self.review_stages.contains(&stage)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            delegate_retries: 1,
            collaborator_timeout_ms: 120_000,
            max_turns: 6,
            review_stages: vec![Stage::Planning],
            auto_draft: true,
            gap_classifier: ClassifierKind::Llm,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per session
    #[serde(rename = "state-dir")]
    pub state_dir: String,
}

impl StorageConfig {
    /// State directory with `~/` expanded
    pub fn state_path(&self) -> PathBuf {
        match self.state_dir.strip_prefix("~/") {
            Some(rest) => dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| PathBuf::from(rest)),
            None => PathBuf::from(&self.state_dir),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/talk2publish on Linux)
        let state_dir = dirs::data_dir()
            .map(|d| d.join("talk2publish").join("sessions"))
            .unwrap_or_else(|| PathBuf::from(".talk2publish"))
            .to_string_lossy()
            .into_owned();

        Self { state_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.workflow.delegate_retries, 1);
        assert!(config.workflow.reviews(Stage::Planning));
        assert!(!config.workflow.reviews(Stage::Profiling));
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_llm_config_defaults() {
        let config = LlmConfig::default();

        assert_eq!(config.provider, "anthropic");
        assert!(config.model.contains("sonnet"));
        assert_eq!(config.api_key_env, "ANTHROPIC_API_KEY");
        assert_eq!(config.base_url, "https://api.anthropic.com");
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
llm:
  provider: anthropic
  model: claude-opus-4
  api-key-env: MY_API_KEY
  max-tokens: 8192

workflow:
  delegate-retries: 2
  collaborator-timeout-ms: 5000
  max-turns: 3
  review-stages: [audience, planning]
  auto-draft: false
  gap-classifier: keyword

storage:
  state-dir: /tmp/t2p

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "claude-opus-4");
        assert_eq!(config.llm.api_key_env, "MY_API_KEY");
        assert_eq!(config.llm.max_tokens, 8192);
        assert_eq!(config.workflow.delegate_retries, 2);
        assert_eq!(config.workflow.collaborator_timeout(), Duration::from_secs(5));
        assert!(config.workflow.reviews(Stage::Audience));
        assert!(!config.workflow.auto_draft);
        assert_eq!(config.workflow.gap_classifier, ClassifierKind::Keyword);
        assert_eq!(config.storage.state_path(), PathBuf::from("/tmp/t2p"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
llm:
  model: claude-haiku
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.llm.model, "claude-haiku");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.workflow.max_turns, 6);
        assert!(config.workflow.auto_draft);
        assert_eq!(config.workflow.gap_classifier, ClassifierKind::Llm);
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let path = PathBuf::from("/definitely/not/here.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tp.yml");
        fs::write(&path, "workflow:\n  max-turns: 2\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.workflow.max_turns, 2);
        assert_eq!(config.llm.provider, "anthropic");
    }

    #[test]
    fn test_local_config_is_first_candidate() {
        let candidates = Config::candidates();
        assert_eq!(candidates[0], PathBuf::from(".talk2publish.yml"));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.llm.api_key_env = "PATH".to_string();
        config.workflow.collaborator_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
