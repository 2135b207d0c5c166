//! Integration tests for model routing across fallback chains
//!
//! Simulated providers stand in for the network; usage and prompt logs are
//! checked through their real SQLite and JSONL sinks.

use std::sync::Arc;
use std::time::Duration;

use chatbridge::core::TaskType;
use chatbridge::llm::{
    CompletionOptions, FallbackChains, ModelRouter, ProviderRegistry, ResponseCache, RouterError,
    SimProvider,
};
use chatbridge::prompt_log::JsonlPromptLogger;
use chatbridge::storage::UsageTracker;
use tempfile::TempDir;

fn registry(openai: SimProvider, anthropic: SimProvider, openrouter: SimProvider) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(openai));
    registry.register(Arc::new(anthropic));
    registry.register(Arc::new(openrouter));
    registry
}

fn healthy() -> ProviderRegistry {
    registry(
        SimProvider::new("openai"),
        SimProvider::new("anthropic"),
        SimProvider::new("openrouter"),
    )
}

#[tokio::test]
async fn test_conversation_falls_back_across_providers_and_is_logged() {
    let dir = TempDir::new().unwrap();
    let usage = Arc::new(UsageTracker::in_memory().unwrap());
    let prompt_log = Arc::new(JsonlPromptLogger::new(dir.path(), 1024 * 1024, 2).unwrap());

    let router = ModelRouter::new(
        FallbackChains::defaults(),
        registry(
            SimProvider::new("openai").failing("gpt-4o"),
            SimProvider::new("anthropic"),
            SimProvider::new("openrouter"),
        ),
    )
    .with_logger(usage.clone())
    .with_logger(prompt_log.clone());

    let options = CompletionOptions::for_task(TaskType::Conversation).with_session("s1");
    let completion = router
        .generate_completion("my key is sk-abcdefghijklmnopqrstuvwx", &options)
        .await
        .unwrap();

    assert_eq!(completion.envelope.model, "claude-3-5-sonnet-20241022");
    assert_eq!(completion.envelope.provider, "anthropic");
    assert_eq!(completion.envelope.fallbacks_used, 1);
    assert!(completion.envelope.success);

    let summary = usage.get_summary().unwrap();
    assert_eq!(summary.request_count, 1);
    assert_eq!(summary.fallback_count, 1);
    assert_eq!(summary.failed_count, 0);

    let logged = std::fs::read_to_string(prompt_log.path()).unwrap();
    let line: serde_json::Value = serde_json::from_str(logged.lines().next().unwrap()).unwrap();
    assert_eq!(line["model"], "claude-3-5-sonnet-20241022");
    assert_eq!(line["fallbacks_used"], 1);
    let logged_prompt = line["prompt"].as_str().unwrap();
    assert!(logged_prompt.contains("sk-[REDACTED]"));
    assert!(!logged_prompt.contains("abcdefghijklmnop"));
}

#[tokio::test]
async fn test_code_chain_reaches_openrouter_last() {
    let router = ModelRouter::new(
        FallbackChains::defaults(),
        registry(
            SimProvider::new("openai").failing("gpt-4o"),
            SimProvider::new("anthropic").failing("claude-3-5-sonnet-20241022"),
            SimProvider::new("openrouter"),
        ),
    );

    let completion = router
        .generate_completion(
            "write fizzbuzz",
            &CompletionOptions::for_task(TaskType::CodeGeneration),
        )
        .await
        .unwrap();
    assert_eq!(completion.envelope.model, "deepseek/deepseek-coder");
    assert_eq!(completion.envelope.provider, "openrouter");
    assert_eq!(completion.envelope.fallbacks_used, 2);
    assert_eq!(completion.content, "[deepseek/deepseek-coder] write fizzbuzz");
}

#[tokio::test]
async fn test_exhausted_chain_reports_and_records_failure() {
    let usage = Arc::new(UsageTracker::in_memory().unwrap());
    let router = ModelRouter::new(
        FallbackChains::defaults(),
        registry(
            SimProvider::new("openai").failing("dall-e-3").failing("dall-e-2"),
            SimProvider::new("anthropic"),
            SimProvider::new("openrouter"),
        ),
    )
    .with_logger(usage.clone());

    let err = router
        .generate_completion("a cat", &CompletionOptions::for_task(TaskType::ImageGeneration))
        .await
        .unwrap_err();
    match &err {
        RouterError::Exhausted {
            task_type,
            attempts,
            ..
        } => {
            assert_eq!(*task_type, TaskType::ImageGeneration);
            assert_eq!(*attempts, 2);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(err.to_string().contains("All 2 models for image_generation failed"));

    let summary = usage.get_summary().unwrap();
    assert_eq!(summary.request_count, 1);
    assert_eq!(summary.failed_count, 1);
    assert!(router.cache().is_empty());
}

#[tokio::test]
async fn test_preferred_provider_goes_first() {
    let router = ModelRouter::new(FallbackChains::defaults(), healthy());
    let options = CompletionOptions::for_task(TaskType::Summarization).with_provider("anthropic");

    let completion = router.generate_completion("tl;dr", &options).await.unwrap();
    assert_eq!(completion.envelope.model, "claude-3-5-haiku-20241022");
    assert_eq!(completion.envelope.fallbacks_used, 0);
}

#[tokio::test]
async fn test_repeated_prompt_is_served_from_cache() {
    let usage = Arc::new(UsageTracker::in_memory().unwrap());
    let router = ModelRouter::new(FallbackChains::defaults(), healthy())
        .with_cache(ResponseCache::new(10).with_ttl(Duration::from_secs(60)))
        .with_logger(usage.clone());
    let options = CompletionOptions::for_task(TaskType::Analysis);

    let first = router.generate_completion("explain", &options).await.unwrap();
    let second = router.generate_completion("explain", &options).await.unwrap();

    assert!(!first.envelope.cached);
    assert!(second.envelope.cached);
    assert_eq!(first.content, second.content);
    assert_eq!(second.envelope.model, first.envelope.model);

    // Other task types do not share entries
    let other = router
        .generate_completion("explain", &CompletionOptions::for_task(TaskType::Conversation))
        .await
        .unwrap();
    assert!(!other.envelope.cached);

    assert_eq!(usage.get_summary().unwrap().cached_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_provider_is_skipped_until_cooldown_ends() {
    let router = ModelRouter::new(
        FallbackChains::defaults(),
        registry(
            SimProvider::new("openai").rate_limited("gpt-4o"),
            SimProvider::new("anthropic"),
            SimProvider::new("openrouter"),
        ),
    )
    .with_cooldown(Duration::from_secs(30));
    let options = CompletionOptions::for_task(TaskType::Conversation);

    let completion = router.generate_completion("one", &options).await.unwrap();
    assert_eq!(completion.envelope.provider, "anthropic");
    assert!(router.cooldowns().is_cooling_down("openai"));

    // gpt-4o-mini is also an openai model and is skipped while cooling down
    let summarize = CompletionOptions::for_task(TaskType::Summarization);
    let completion = router.generate_completion("two", &summarize).await.unwrap();
    assert_eq!(completion.envelope.model, "claude-3-5-haiku-20241022");

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!router.cooldowns().is_cooling_down("openai"));
    let completion = router.generate_completion("three", &summarize).await.unwrap();
    assert_eq!(completion.envelope.model, "gpt-4o-mini");
}
