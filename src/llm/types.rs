//! Request and response types for model calls

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::TaskType;

/// Per-request options for [`ModelRouter::generate_completion`](super::ModelRouter::generate_completion)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionOptions {
    pub task_type: TaskType,
    /// Explicit model, tried before the chain
    pub model: Option<String>,
    /// Preferred provider, its chain models move to the front
    pub provider: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    /// Chat session the request belongs to, recorded in the envelope
    pub session_id: Option<String>,
    /// Caller-chosen trace id; generated when unset
    pub trace_id: Option<String>,
}

impl CompletionOptions {
    pub fn for_task(task_type: TaskType) -> Self {
        Self {
            task_type,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// What a provider returned; token counts are optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub content: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub tokens_used: Option<u32>,
    pub latency_ms: Option<u64>,
}

impl ProviderOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.input_tokens = Some(input_tokens);
        self.output_tokens = Some(output_tokens);
        self.tokens_used = Some(input_tokens + output_tokens);
        self
    }
}

/// Immutable record of one `generate_completion` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub trace_id: String,
    pub session_id: String,
    pub task_type: TaskType,
    pub provider: String,
    pub model: String,
    /// Index of the answering model in the attempt list
    pub fallbacks_used: usize,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    /// True when any count came from the local tokenizer
    pub estimated: bool,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub cached: bool,
    pub created_at: DateTime<Utc>,
}

/// A successful completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub content: String,
    pub envelope: ResponseEnvelope,
}

impl Completion {
    pub fn model(&self) -> &str {
        &self.envelope.model
    }

    pub fn provider(&self) -> &str {
        &self.envelope.provider
    }

    pub fn fallbacks_used(&self) -> usize {
        self.envelope.fallbacks_used
    }

    pub fn cached(&self) -> bool {
        self.envelope.cached
    }
}
