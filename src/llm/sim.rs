//! Simulation provider for offline runs and tests
//!
//! Answers without network access. Failures are scripted per model, either
//! through the builder or through environment variables so the CLI can be
//! driven end to end:
//!
//! - `CHATBRIDGE_SIM_FAIL`: comma-separated models answering 503
//! - `CHATBRIDGE_SIM_RATE_LIMIT`: comma-separated models answering 429

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use super::{CompletionOptions, LlmError, LlmProvider, ProviderOutput};

pub const SIM_FAIL_ENV: &str = "CHATBRIDGE_SIM_FAIL";
pub const SIM_RATE_LIMIT_ENV: &str = "CHATBRIDGE_SIM_RATE_LIMIT";

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct SimCall {
    pub model: String,
    pub prompt: String,
}

pub struct SimProvider {
    name: String,
    failing: HashSet<String>,
    rate_limited: HashSet<String>,
    report_usage: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<SimCall>>,
}

fn models_from_env(var: &str) -> HashSet<String> {
    std::env::var(var)
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl SimProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failing: HashSet::new(),
            rate_limited: HashSet::new(),
            report_usage: true,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripted failures taken from `CHATBRIDGE_SIM_*`
    pub fn from_env(name: impl Into<String>) -> Self {
        let mut sim = Self::new(name);
        sim.failing = models_from_env(SIM_FAIL_ENV);
        sim.rate_limited = models_from_env(SIM_RATE_LIMIT_ENV);
        sim
    }

    pub fn failing(mut self, model: impl Into<String>) -> Self {
        self.failing.insert(model.into());
        self
    }

    pub fn rate_limited(mut self, model: impl Into<String>) -> Self {
        self.rate_limited.insert(model.into());
        self
    }

    /// Leave token counts out of the output
    pub fn without_usage(mut self) -> Self {
        self.report_usage = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn record(&self, model: &str, prompt: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(SimCall {
                model: model.to_string(),
                prompt: prompt.to_string(),
            });
        }
    }
}

fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

#[async_trait]
impl LlmProvider for SimProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<ProviderOutput, LlmError> {
        self.record(model, prompt);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.rate_limited.contains(model) {
            return Err(LlmError::RateLimited(format!("{model}: simulated 429")));
        }
        if self.failing.contains(model) {
            return Err(LlmError::ServiceError(format!("{model}: simulated 503")));
        }

        let content = format!("[{model}] {prompt}");
        let output = ProviderOutput::text(content.clone());
        Ok(if self.report_usage {
            output.with_usage(word_count(prompt), word_count(&content))
        } else {
            output
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_with_word_counts() {
        let sim = SimProvider::new("openai");
        let out = sim
            .complete("gpt-4o", "hello there", &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out.content, "[gpt-4o] hello there");
        assert_eq!(out.input_tokens, Some(2));
        assert_eq!(out.output_tokens, Some(3));
        assert_eq!(sim.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let sim = SimProvider::new("openai")
            .failing("gpt-4o")
            .rate_limited("gpt-4o-mini");
        let opts = CompletionOptions::default();

        assert!(matches!(
            sim.complete("gpt-4o", "x", &opts).await,
            Err(LlmError::ServiceError(_))
        ));
        assert!(matches!(
            sim.complete("gpt-4o-mini", "x", &opts).await,
            Err(LlmError::RateLimited(_))
        ));
        assert_eq!(sim.calls()[1].model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_without_usage() {
        let sim = SimProvider::new("anthropic").without_usage();
        let out = sim
            .complete("claude-3-5-haiku-20241022", "hi", &CompletionOptions::default())
            .await
            .unwrap();
        assert!(out.input_tokens.is_none());
        assert!(out.tokens_used.is_none());
    }
}
