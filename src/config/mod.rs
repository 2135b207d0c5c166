//! Configuration management for chatbridge

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::core::{ChatSettings, FeatureFlags};
use crate::delivery::RetryConfig;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "CHATBRIDGE_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub chat: ChatConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub features: FeatureFlags,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Key for per-user rows in `chat_settings` / `retry_configurations`
    pub user_id: String,
    pub rate_limit_per_minute: u32,
    pub max_offline_messages: usize,
    pub rate_limit_window_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let defaults = ChatSettings::default();
        Self {
            user_id: whoami::username(),
            rate_limit_per_minute: defaults.rate_limit_per_minute,
            max_offline_messages: defaults.max_offline_messages,
            rate_limit_window_secs: 60,
        }
    }
}

impl ChatConfig {
    pub fn settings(&self) -> ChatSettings {
        ChatSettings {
            rate_limit_per_minute: self.rate_limit_per_minute,
            max_offline_messages: self.max_offline_messages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory; platform data dir when unset
    pub dir: Option<PathBuf>,
    /// Local storage key prefix
    pub prefix: String,
    /// Local storage envelope version; bumping it invalidates old entries
    pub version: u32,
    /// SQLite file name inside `dir`
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: None,
            prefix: crate::storage::local::DEFAULT_PREFIX.to_string(),
            version: crate::storage::local::STORAGE_VERSION,
            database: "chat.db".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(crate::storage::default_data_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(&self.database)
    }

    pub fn local_dir(&self) -> PathBuf {
        self.data_dir().join("local")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Preferred provider; its models are tried first
    pub default_provider: Option<String>,
    /// `chars` (about four characters per token) or `words`
    pub token_estimator: String,
    /// Reject prompts estimated above this many tokens
    pub max_prompt_tokens: Option<usize>,
    pub response_cache_size: usize,
    pub response_cache_ttl_secs: u64,
    /// How long a rate-limited provider is skipped
    pub provider_cooldown_secs: u64,
    /// Chain overrides keyed by task type (`conversation`, `code_generation`, ...)
    pub chains: BTreeMap<String, Vec<String>>,
    /// Extra `model = "provider"` mappings
    pub models: BTreeMap<String, String>,
    pub openai: OpenAiConfig,
    pub anthropic: AnthropicConfig,
    pub openrouter: OpenRouterConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            token_estimator: "chars".to_string(),
            max_prompt_tokens: None,
            response_cache_size: 100,
            response_cache_ttl_secs: 300,
            provider_cooldown_secs: 60,
            chains: BTreeMap::new(),
            models: BTreeMap::new(),
            openai: OpenAiConfig::default(),
            anthropic: AnthropicConfig::default(),
            openrouter: OpenRouterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub max_tokens: u32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write the JSONL prompt log
    pub prompt_log: bool,
    /// Defaults to `<data dir>/logs`
    pub prompt_log_dir: Option<PathBuf>,
    /// Rotate once the log reaches this many bytes
    pub max_file_size: u64,
    pub max_rotated_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            prompt_log: true,
            prompt_log_dir: None,
            max_file_size: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "chatbridge") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<PathBuf> {
        let config_path = Self::config_path()?;
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Prompt log directory
    pub fn prompt_log_dir(&self) -> PathBuf {
        self.logging
            .prompt_log_dir
            .clone()
            .unwrap_or_else(|| self.storage.data_dir().join("logs"))
    }
}
