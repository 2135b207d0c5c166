//! Model router: walks a task's fallback chain until one model answers
//!
//! The attempt list comes from [`FallbackChains::attempt_order`]; the loop is
//! bounded by its length. Every call, answered or exhausted, produces one
//! [`ResponseEnvelope`] that goes to the prompt loggers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::cache::{CachedResponse, ResponseCache};
use super::chains::FallbackChains;
use super::cooldown::ProviderCooldowns;
use super::error::RouterError;
use super::types::{Completion, CompletionOptions, ProviderOutput, ResponseEnvelope};
use super::ProviderRegistry;
use crate::config::LlmConfig;
use crate::core::{tokenizer_for, ApproximateTokenizer, ChainError, TaskType, Tokenizer};
use crate::prompt_log::{log_quietly, PromptLogger};

pub struct ModelRouter {
    chains: FallbackChains,
    registry: ProviderRegistry,
    cache: ResponseCache,
    cooldowns: ProviderCooldowns,
    cooldown: Duration,
    loggers: Vec<Arc<dyn PromptLogger>>,
    tokenizer: Box<dyn Tokenizer>,
    max_prompt_tokens: Option<usize>,
}

fn saturate(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl ModelRouter {
    pub fn new(chains: FallbackChains, registry: ProviderRegistry) -> Self {
        Self {
            chains,
            registry,
            cache: ResponseCache::default(),
            cooldowns: ProviderCooldowns::new(),
            cooldown: Duration::from_secs(60),
            loggers: Vec::new(),
            tokenizer: Box::new(ApproximateTokenizer),
            max_prompt_tokens: None,
        }
    }

    /// Router with chains, cache, cooldown and tokenizer taken from `[llm]`
    pub fn from_config(config: &LlmConfig, registry: ProviderRegistry) -> Result<Self, ChainError> {
        let chains = FallbackChains::with_overrides(&config.chains, &config.models)?;
        Ok(Self::new(chains, registry)
            .with_cache(
                ResponseCache::new(config.response_cache_size)
                    .with_ttl(Duration::from_secs(config.response_cache_ttl_secs)),
            )
            .with_cooldown(Duration::from_secs(config.provider_cooldown_secs))
            .with_tokenizer(tokenizer_for(&config.token_estimator))
            .with_max_prompt_tokens(config.max_prompt_tokens))
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn PromptLogger>) -> Self {
        self.loggers.push(logger);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_max_prompt_tokens(mut self, limit: Option<usize>) -> Self {
        self.max_prompt_tokens = limit;
        self
    }

    pub fn chains(&self) -> &FallbackChains {
        &self.chains
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn cooldowns(&self) -> &ProviderCooldowns {
        &self.cooldowns
    }

    /// Estimated prompt size under the configured tokenizer
    pub fn estimate_tokens(&self, text: &str) -> usize {
        self.tokenizer.count_tokens(text)
    }

    /// Generate a completion, falling back along the task's chain
    pub async fn generate_completion(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, RouterError> {
        let started = Instant::now();
        let task_type = options.task_type;
        let trace_id = options
            .trace_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if let Some(limit) = self.max_prompt_tokens {
            let estimated = self.estimate_tokens(prompt);
            if estimated > limit {
                tracing::warn!(%trace_id, estimated, limit, "prompt over token limit");
                return Err(RouterError::TokenLimitExceeded { estimated, limit });
            }
        }

        let order = self.chains.attempt_order(
            task_type,
            options.model.as_deref(),
            options.provider.as_deref(),
        )?;

        let record = EnvelopeDraft {
            trace_id: &trace_id,
            session_id: options.session_id.as_deref().unwrap_or_default(),
            task_type,
            started,
        };

        if let Some(hit) = self.cache.get(task_type, prompt) {
            tracing::debug!(%trace_id, model = %hit.model, "response cache hit");
            let output = ProviderOutput::text(hit.content.clone());
            let mut envelope = self.finish(&record, &hit.provider, &hit.model, 0, prompt, &output);
            envelope.cached = true;
            log_quietly(&self.loggers, &envelope, prompt, &hit.content);
            return Ok(Completion {
                content: hit.content,
                envelope,
            });
        }

        let mut last_error = String::new();
        let mut transient = false;
        for (level, model) in order.iter().enumerate() {
            let Some(provider_name) = self.chains.provider_for(model) else {
                last_error = format!("{model}: no provider mapping");
                continue;
            };

            if let Some(remaining) = self.cooldowns.remaining(provider_name) {
                tracing::debug!(%trace_id, provider = provider_name, "skipping provider in cooldown");
                last_error = format!(
                    "{model}: {provider_name} cooling down for {}s",
                    remaining.as_secs()
                );
                transient = true;
                continue;
            }

            let Some(provider) = self.registry.get(provider_name) else {
                tracing::warn!(%trace_id, provider = provider_name, "provider not configured");
                last_error = format!("{model}: provider {provider_name} is not configured");
                continue;
            };

            tracing::debug!(%trace_id, model = %model, provider = provider_name, level, "calling model");
            match provider.complete(model, prompt, options).await {
                Ok(output) => {
                    let envelope =
                        self.finish(&record, provider_name, model, level, prompt, &output);
                    self.cache.put(
                        task_type,
                        prompt,
                        CachedResponse {
                            content: output.content.clone(),
                            model: model.clone(),
                            provider: provider_name.to_string(),
                        },
                    );
                    log_quietly(&self.loggers, &envelope, prompt, &output.content);
                    tracing::info!(
                        %trace_id,
                        model = %model,
                        provider = provider_name,
                        fallbacks_used = level,
                        tokens = envelope.total_tokens,
                        "completion succeeded"
                    );
                    return Ok(Completion {
                        content: output.content,
                        envelope,
                    });
                }
                Err(err) => {
                    if err.needs_rate_limit_wait() {
                        self.cooldowns.cool_down(provider_name, self.cooldown);
                    }
                    let retryable = err.is_retryable();
                    transient |= retryable;
                    tracing::warn!(%trace_id, model = %model, provider = provider_name, retryable, "model failed: {err}");
                    last_error = format!("{model}: {err}");
                }
            }
        }

        let attempts = order.len();
        let last_model = order.last().map(String::as_str).unwrap_or_default();
        let provider = self.chains.provider_for(last_model).unwrap_or_default();
        let mut envelope = self.finish(
            &record,
            provider,
            last_model,
            attempts.saturating_sub(1),
            prompt,
            &ProviderOutput::default(),
        );
        envelope.success = false;
        envelope.output_tokens = 0;
        envelope.total_tokens = envelope.input_tokens;
        envelope.error = Some(last_error.clone());
        log_quietly(&self.loggers, &envelope, prompt, "");

        tracing::error!(%trace_id, task_type = %task_type, attempts, transient, "fallback chain exhausted");
        Err(RouterError::Exhausted {
            task_type,
            attempts,
            last_error,
            transient,
        })
    }

    /// Build the envelope, filling missing token counts from the tokenizer
    fn finish(
        &self,
        draft: &EnvelopeDraft<'_>,
        provider: &str,
        model: &str,
        fallbacks_used: usize,
        prompt: &str,
        output: &ProviderOutput,
    ) -> ResponseEnvelope {
        let (input_tokens, input_estimated) = match output.input_tokens {
            Some(n) => (n, false),
            None => (saturate(self.estimate_tokens(prompt)), true),
        };
        let (output_tokens, output_estimated) = match output.output_tokens {
            Some(n) => (n, false),
            None => (saturate(self.estimate_tokens(&output.content)), true),
        };
        let estimated = input_estimated || output_estimated;
        let total_tokens = match output.tokens_used {
            Some(total) if !estimated => total,
            _ => input_tokens.saturating_add(output_tokens),
        };

        ResponseEnvelope {
            trace_id: draft.trace_id.to_string(),
            session_id: draft.session_id.to_string(),
            task_type: draft.task_type,
            provider: provider.to_string(),
            model: model.to_string(),
            fallbacks_used,
            input_tokens,
            output_tokens,
            total_tokens,
            estimated,
            latency_ms: u64::try_from(draft.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            success: true,
            error: None,
            cached: false,
            created_at: Utc::now(),
        }
    }
}

struct EnvelopeDraft<'a> {
    trace_id: &'a str,
    session_id: &'a str,
    task_type: TaskType,
    started: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SimProvider;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLogger {
        envelopes: Mutex<Vec<ResponseEnvelope>>,
    }

    impl PromptLogger for RecordingLogger {
        fn log_prompt(&self, envelope: &ResponseEnvelope, _: &str, _: &str) -> anyhow::Result<()> {
            self.envelopes.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    /// Every task uses `[m0, m1, m2]`, all served by provider "sim"
    fn sim_chains() -> FallbackChains {
        let models: Vec<String> = ["m0", "m1", "m2"].map(String::from).to_vec();
        let chains = TaskType::ALL
            .into_iter()
            .map(|task| (task, models.clone()))
            .collect();
        let providers = models
            .iter()
            .map(|m| (m.clone(), "sim".to_string()))
            .collect::<BTreeMap<_, _>>();
        FallbackChains::new(chains, providers).unwrap()
    }

    fn router_with(sim: Arc<SimProvider>) -> (ModelRouter, Arc<RecordingLogger>) {
        let mut registry = ProviderRegistry::new();
        registry.register(sim);
        let logger = Arc::new(RecordingLogger::default());
        let router = ModelRouter::new(sim_chains(), registry).with_logger(logger.clone());
        (router, logger)
    }

    #[tokio::test]
    async fn test_first_model_answers() {
        let sim = Arc::new(SimProvider::new("sim"));
        let (router, logger) = router_with(sim.clone());

        let completion = router
            .generate_completion("hello world", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(completion.model(), "m0");
        assert_eq!(completion.fallbacks_used(), 0);
        assert_eq!(completion.envelope.input_tokens, 2);
        assert!(!completion.envelope.estimated);
        assert_eq!(logger.envelopes.lock().unwrap().len(), 1);
        assert_eq!(sim.call_count(), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_third_model() {
        let sim = Arc::new(SimProvider::new("sim").failing("m0").failing("m1"));
        let (router, logger) = router_with(sim.clone());

        let completion = router
            .generate_completion(
                "hi",
                &CompletionOptions::for_task(TaskType::Analysis).with_session("s1"),
            )
            .await
            .unwrap();
        assert_eq!(completion.model(), "m2");
        assert_eq!(completion.fallbacks_used(), 2);
        assert_eq!(completion.content, "[m2] hi");
        assert_eq!(completion.envelope.session_id, "s1");
        assert_eq!(sim.call_count(), 3);

        let logged = logger.envelopes.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].success);
        assert_eq!(logged[0].fallbacks_used, 2);
    }

    #[tokio::test]
    async fn test_all_failing_is_exhausted_and_not_cached() {
        let sim = Arc::new(
            SimProvider::new("sim")
                .failing("m0")
                .failing("m1")
                .failing("m2"),
        );
        let (router, logger) = router_with(sim);

        let err = router
            .generate_completion("hi", &CompletionOptions::default())
            .await
            .unwrap_err();
        // simulated 503s are transient
        assert!(err.is_retryable());
        match err {
            RouterError::Exhausted {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.starts_with("m2:"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(router.cache().is_empty());

        let logged = logger.envelopes.lock().unwrap();
        assert_eq!(logged.len(), 1);
        assert!(!logged[0].success);
        assert_eq!(logged[0].fallbacks_used, 2);
        assert!(logged[0].error.is_some());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers() {
        let sim = Arc::new(SimProvider::new("sim"));
        let (router, _) = router_with(sim.clone());
        let opts = CompletionOptions::default();

        router.generate_completion("same prompt", &opts).await.unwrap();
        let second = router.generate_completion("same prompt", &opts).await.unwrap();

        assert!(second.cached());
        assert_eq!(second.fallbacks_used(), 0);
        assert_eq!(second.model(), "m0");
        assert_eq!(sim.call_count(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_provider_cools_down() {
        let sim = Arc::new(SimProvider::new("sim").rate_limited("m0"));
        let (router, _) = router_with(sim.clone());

        let err = router
            .generate_completion("first", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Exhausted { .. }));
        assert!(router.cooldowns().is_cooling_down("sim"));
        // m1 and m2 skipped: the provider is cooling down after m0's 429
        assert_eq!(sim.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_provider_counts_as_failure() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(SimProvider::new("openai")));
        let router = ModelRouter::new(FallbackChains::defaults(), registry);

        // claude-3-5-sonnet first (anthropic missing), then gpt-4o
        let completion = router
            .generate_completion("hi", &CompletionOptions::for_task(TaskType::Analysis))
            .await
            .unwrap();
        assert_eq!(completion.model(), "gpt-4o");
        assert_eq!(completion.provider(), "openai");
        assert_eq!(completion.fallbacks_used(), 1);
    }

    #[tokio::test]
    async fn test_missing_providers_are_not_retryable() {
        let router = ModelRouter::new(FallbackChains::defaults(), ProviderRegistry::new());

        let err = router
            .generate_completion("hi", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::Exhausted { transient: false, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_model_override_tried_first() {
        let sim = Arc::new(SimProvider::new("sim"));
        let (router, _) = router_with(sim.clone());

        let completion = router
            .generate_completion("hi", &CompletionOptions::default().with_model("m2"))
            .await
            .unwrap();
        assert_eq!(completion.model(), "m2");
        assert_eq!(completion.fallbacks_used(), 0);
    }

    #[tokio::test]
    async fn test_token_limit_rejects_before_calls() {
        let sim = Arc::new(SimProvider::new("sim"));
        let (router, logger) = router_with(sim.clone());
        let router = router.with_max_prompt_tokens(Some(2));

        let err = router
            .generate_completion("this prompt is too long", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::TokenLimitExceeded { limit: 2, .. }
        ));
        assert_eq!(sim.call_count(), 0);
        assert!(logger.envelopes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_usage_is_estimated() {
        let sim = Arc::new(SimProvider::new("sim").without_usage());
        let (router, _) = router_with(sim);

        let completion = router
            .generate_completion("abcdefgh", &CompletionOptions::default())
            .await
            .unwrap();
        assert!(completion.envelope.estimated);
        assert_eq!(completion.envelope.input_tokens, 2);
        assert_eq!(
            completion.envelope.total_tokens,
            completion.envelope.input_tokens + completion.envelope.output_tokens
        );
    }

    #[tokio::test]
    async fn test_caller_trace_id_is_kept() {
        let sim = Arc::new(SimProvider::new("sim"));
        let (router, _) = router_with(sim);
        let completion = router
            .generate_completion("hi", &CompletionOptions::default().with_trace_id("trace-1"))
            .await
            .unwrap();
        assert_eq!(completion.envelope.trace_id, "trace-1");
    }
}
