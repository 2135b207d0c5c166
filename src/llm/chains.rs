//! Per-task fallback chains and the model → provider map
//!
//! Every model a chain references must resolve to a provider; this is checked
//! when the chains are built, never at request time.

use std::collections::BTreeMap;

use crate::core::{ChainError, TaskType};

/// Model families resolved by prefix when no explicit mapping exists
const PROVIDER_PREFIXES: &[(&str, &str)] = &[
    ("gpt-", "openai"),
    ("o1", "openai"),
    ("o3", "openai"),
    ("dall-e", "openai"),
    ("claude-", "anthropic"),
];

/// Namespaced ids (`vendor/model`) are routed through OpenRouter
const NAMESPACED_PROVIDER: &str = "openrouter";

fn default_chain(task_type: TaskType) -> &'static [&'static str] {
    match task_type {
        TaskType::Conversation => &["gpt-4o", "claude-3-5-sonnet-20241022", "gpt-4o-mini"],
        TaskType::CodeGeneration => &[
            "claude-3-5-sonnet-20241022",
            "gpt-4o",
            "deepseek/deepseek-coder",
        ],
        TaskType::ImageGeneration => &["dall-e-3", "dall-e-2"],
        TaskType::Summarization => &["gpt-4o-mini", "claude-3-5-haiku-20241022", "gpt-4o"],
        TaskType::Analysis => &["claude-3-5-sonnet-20241022", "gpt-4o"],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChains {
    chains: BTreeMap<TaskType, Vec<String>>,
    models: BTreeMap<String, String>,
}

impl Default for FallbackChains {
    fn default() -> Self {
        Self::defaults()
    }
}

impl FallbackChains {
    /// Build chains from explicit lists, validating every model
    pub fn new(
        chains: BTreeMap<TaskType, Vec<String>>,
        models: BTreeMap<String, String>,
    ) -> Result<Self, ChainError> {
        let chains = Self { chains, models };
        chains.validate()?;
        Ok(chains)
    }

    /// Built-in chains for every task type
    pub fn defaults() -> Self {
        let chains = TaskType::ALL
            .into_iter()
            .map(|task| {
                let models = default_chain(task).iter().map(|m| m.to_string()).collect();
                (task, models)
            })
            .collect();
        Self {
            chains,
            models: BTreeMap::new(),
        }
    }

    /// Defaults with config overrides applied (keys are task type names)
    pub fn with_overrides(
        overrides: &BTreeMap<String, Vec<String>>,
        models: &BTreeMap<String, String>,
    ) -> Result<Self, ChainError> {
        let mut chains = Self::defaults();
        chains
            .models
            .extend(models.iter().map(|(m, p)| (m.clone(), p.clone())));
        for (key, list) in overrides {
            let task: TaskType = key
                .parse()
                .map_err(|_| ChainError::UnknownTaskType(key.clone()))?;
            chains.chains.insert(task, list.clone());
        }
        chains.validate()?;
        Ok(chains)
    }

    fn validate(&self) -> Result<(), ChainError> {
        for task in TaskType::ALL {
            let chain = self.chain(task);
            if chain.is_empty() {
                return Err(ChainError::EmptyChain(task));
            }
            if let Some(model) = chain.iter().find(|m| self.provider_for(m).is_none()) {
                return Err(ChainError::UnmappedModel {
                    task_type: task,
                    model: model.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn chain(&self, task_type: TaskType) -> &[String] {
        self.chains
            .get(&task_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskType, &[String])> {
        self.chains.iter().map(|(task, models)| (*task, models.as_slice()))
    }

    /// Provider that serves `model`
    pub fn provider_for(&self, model: &str) -> Option<&str> {
        if let Some(provider) = self.models.get(model) {
            return Some(provider.as_str());
        }
        PROVIDER_PREFIXES
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, provider)| *provider)
            .or_else(|| model.contains('/').then_some(NAMESPACED_PROVIDER))
    }

    /// Models to try, in order
    ///
    /// An explicit `model_override` goes first, followed by the chain without
    /// it. With a `preferred_provider`, that provider's chain models move to
    /// the front while keeping their relative order.
    pub fn attempt_order(
        &self,
        task_type: TaskType,
        model_override: Option<&str>,
        preferred_provider: Option<&str>,
    ) -> Result<Vec<String>, ChainError> {
        let chain = self.chain(task_type);
        if chain.is_empty() {
            return Err(ChainError::EmptyChain(task_type));
        }

        let mut order = Vec::with_capacity(chain.len() + 1);
        if let Some(model) = model_override {
            if self.provider_for(model).is_none() {
                return Err(ChainError::UnmappedModel {
                    task_type,
                    model: model.to_string(),
                });
            }
            order.push(model.to_string());
        }

        let mut rest: Vec<&String> = chain
            .iter()
            .filter(|m| Some(m.as_str()) != model_override)
            .collect();
        if let Some(preferred) = preferred_provider {
            rest.sort_by_key(|m| self.provider_for(m) != Some(preferred));
        }
        order.extend(rest.into_iter().cloned());
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let chains = FallbackChains::defaults();
        assert!(chains.validate().is_ok());
        for task in TaskType::ALL {
            assert!(!chains.chain(task).is_empty());
        }
        assert_eq!(chains.chain(TaskType::ImageGeneration), ["dall-e-3", "dall-e-2"]);
    }

    #[test]
    fn test_provider_for() {
        let chains = FallbackChains::defaults();
        assert_eq!(chains.provider_for("gpt-4o"), Some("openai"));
        assert_eq!(chains.provider_for("dall-e-3"), Some("openai"));
        assert_eq!(
            chains.provider_for("claude-3-5-haiku-20241022"),
            Some("anthropic")
        );
        assert_eq!(
            chains.provider_for("deepseek/deepseek-coder"),
            Some("openrouter")
        );
        assert_eq!(chains.provider_for("llama3"), None);
    }

    #[test]
    fn test_unmapped_model_rejected_at_construction() {
        let mut chains = BTreeMap::new();
        for task in TaskType::ALL {
            chains.insert(task, vec!["gpt-4o".to_string()]);
        }
        chains.insert(TaskType::Analysis, vec!["mystery-model".to_string()]);

        let err = FallbackChains::new(chains, BTreeMap::new()).unwrap_err();
        assert_eq!(
            err,
            ChainError::UnmappedModel {
                task_type: TaskType::Analysis,
                model: "mystery-model".into()
            }
        );
    }

    #[test]
    fn test_explicit_mapping_allows_custom_model() {
        let overrides = BTreeMap::from([(
            "conversation".to_string(),
            vec!["llama3".to_string(), "gpt-4o".to_string()],
        )]);
        let models = BTreeMap::from([("llama3".to_string(), "openai".to_string())]);
        let chains = FallbackChains::with_overrides(&overrides, &models).unwrap();
        assert_eq!(chains.chain(TaskType::Conversation)[0], "llama3");
        assert_eq!(chains.provider_for("llama3"), Some("openai"));
    }

    #[test]
    fn test_overrides_reject_bad_keys_and_empty_chains() {
        let bad_key = BTreeMap::from([("chit_chat".to_string(), vec!["gpt-4o".to_string()])]);
        assert_eq!(
            FallbackChains::with_overrides(&bad_key, &BTreeMap::new()).unwrap_err(),
            ChainError::UnknownTaskType("chit_chat".into())
        );

        let empty = BTreeMap::from([("analysis".to_string(), Vec::new())]);
        assert_eq!(
            FallbackChains::with_overrides(&empty, &BTreeMap::new()).unwrap_err(),
            ChainError::EmptyChain(TaskType::Analysis)
        );
    }

    #[test]
    fn test_attempt_order_plain_chain() {
        let chains = FallbackChains::defaults();
        let order = chains
            .attempt_order(TaskType::Conversation, None, None)
            .unwrap();
        assert_eq!(order, ["gpt-4o", "claude-3-5-sonnet-20241022", "gpt-4o-mini"]);
    }

    #[test]
    fn test_attempt_order_override_goes_first_once() {
        let chains = FallbackChains::defaults();
        let order = chains
            .attempt_order(TaskType::Conversation, Some("gpt-4o-mini"), None)
            .unwrap();
        assert_eq!(order, ["gpt-4o-mini", "gpt-4o", "claude-3-5-sonnet-20241022"]);

        let order = chains
            .attempt_order(TaskType::Conversation, Some("gpt-4-turbo"), None)
            .unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "gpt-4-turbo");

        let err = chains
            .attempt_order(TaskType::Conversation, Some("unknown"), None)
            .unwrap_err();
        assert!(matches!(err, ChainError::UnmappedModel { .. }));
    }

    #[test]
    fn test_attempt_order_preferred_provider_is_stable() {
        let chains = FallbackChains::defaults();
        let order = chains
            .attempt_order(TaskType::Summarization, None, Some("anthropic"))
            .unwrap();
        assert_eq!(order, ["claude-3-5-haiku-20241022", "gpt-4o-mini", "gpt-4o"]);

        let order = chains
            .attempt_order(TaskType::Conversation, None, Some("openai"))
            .unwrap();
        assert_eq!(order, ["gpt-4o", "gpt-4o-mini", "claude-3-5-sonnet-20241022"]);
    }
}
