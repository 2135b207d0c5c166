//! LLM providers and the fallback router

mod anthropic;
mod cache;
mod chains;
mod cooldown;
mod error;
mod openai_compat;
mod router;
pub mod sim;
mod types;

pub use anthropic::AnthropicProvider;
pub use cache::{CachedResponse, ResponseCache};
pub use chains::FallbackChains;
pub use cooldown::ProviderCooldowns;
pub use error::{LlmError, RouterError};
pub use openai_compat::{AuthMethod, OpenAiCompatConfig, OpenAiCompatProvider};
pub use router::ModelRouter;
pub use sim::SimProvider;
pub use types::*;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::LlmConfig;

/// Provider names the factory knows
pub const PROVIDER_NAMES: [&str; 3] = ["openai", "anthropic", "openrouter"];

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Registry name, matched against the model → provider map
    fn name(&self) -> &str;

    /// Single-prompt completion on `model`
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<ProviderOutput, LlmError>;
}

/// Providers available to the router, keyed by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the provider's own name, replacing any previous entry
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

fn api_key(env_var: &str) -> Result<String> {
    std::env::var(env_var)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .with_context(|| format!("{env_var} environment variable not set"))
}

/// Create a provider by name using its `[llm.<name>]` section
pub fn create_provider(name: &str, config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match name.to_lowercase().as_str() {
        "openai" | "gpt" => {
            let key = api_key(&config.openai.api_key_env)?;
            let compat = OpenAiCompatConfig::new(
                "openai",
                &config.openai.base_url,
                AuthMethod::BearerToken(key),
            )
            .with_max_tokens(config.openai.max_tokens);
            Ok(Arc::new(OpenAiCompatProvider::new(compat)))
        }
        "anthropic" | "claude" => {
            let key = api_key(&config.anthropic.api_key_env)?;
            Ok(Arc::new(
                AnthropicProvider::new(key, &config.anthropic.base_url)
                    .with_max_tokens(config.anthropic.max_tokens),
            ))
        }
        "openrouter" => {
            let key = api_key(&config.openrouter.api_key_env)?;
            let compat = OpenAiCompatConfig::new(
                "openrouter",
                &config.openrouter.base_url,
                AuthMethod::BearerToken(key),
            )
            .with_max_tokens(config.openrouter.max_tokens)
            .with_header("X-Title", "chatbridge");
            Ok(Arc::new(OpenAiCompatProvider::new(compat)))
        }
        _ => anyhow::bail!(
            "Unknown provider: {}. Available: {}",
            name,
            PROVIDER_NAMES.join(", ")
        ),
    }
}

/// Registry with every provider that can be built
///
/// With `sim`, every provider name is served by [`SimProvider`]. Otherwise
/// providers without an API key are left out; the router treats their models
/// as failed attempts and moves on.
pub fn registry_from_config(config: &LlmConfig, sim: bool) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    for name in PROVIDER_NAMES {
        if sim {
            registry.register(Arc::new(SimProvider::from_env(name)));
            continue;
        }
        match create_provider(name, config) {
            Ok(provider) => registry.register(provider),
            Err(e) => tracing::warn!(provider = name, "provider unavailable: {e:#}"),
        }
    }
    registry
}
