//! Send middleware
//!
//! Every outgoing message passes through a pipeline of checks before the
//! bridge touches storage or the network. A middleware either passes the
//! (possibly rewritten) message on or rejects it with a [`BridgeError`].

use super::errors::BridgeError;
use crate::core::{BridgeState, ChatMode, FeatureFlags, MessageType};

/// Longest accepted message, in characters
pub const MAX_MESSAGE_CHARS: usize = 32_000;

/// A message on its way into the delivery pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub content: String,
    pub mode: ChatMode,
    pub message_type: MessageType,
}

impl OutgoingMessage {
    pub fn new(content: impl Into<String>, mode: ChatMode) -> Self {
        Self {
            content: content.into(),
            mode,
            message_type: mode.message_type(),
        }
    }
}

/// What middlewares can see of the bridge
pub struct SendContext<'a> {
    pub features: &'a FeatureFlags,
    pub state: &'a BridgeState,
}

/// Result of middleware processing
#[derive(Debug)]
pub enum MiddlewareResult {
    Continue(OutgoingMessage),
    Reject(BridgeError),
}

/// Middleware function type
pub type MiddlewareFn =
    Box<dyn Fn(OutgoingMessage, &SendContext<'_>) -> MiddlewareResult + Send + Sync + 'static>;

/// Pipeline that applies middlewares in sequence
pub struct SendPipeline {
    middlewares: Vec<MiddlewareFn>,
}

impl SendPipeline {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Logging, normalization and the feature gate, in that order
    pub fn standard() -> Self {
        Self::new()
            .with_middleware(Box::new(logging_middleware))
            .with_middleware(Box::new(normalization_middleware))
            .with_middleware(Box::new(feature_gate_middleware))
    }

    pub fn with_middleware(mut self, middleware: MiddlewareFn) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the message through every middleware; the first rejection wins
    pub fn process(
        &self,
        message: OutgoingMessage,
        ctx: &SendContext<'_>,
    ) -> Result<OutgoingMessage, BridgeError> {
        let mut current = message;
        for middleware in &self.middlewares {
            match middleware(current, ctx) {
                MiddlewareResult::Continue(next) => current = next,
                MiddlewareResult::Reject(err) => return Err(err),
            }
        }
        Ok(current)
    }
}

impl Default for SendPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

// ========== Built-in Middlewares ==========

pub fn logging_middleware(message: OutgoingMessage, ctx: &SendContext<'_>) -> MiddlewareResult {
    tracing::debug!(
        session_id = %ctx.state.session_id,
        mode = %message.mode,
        chars = message.content.chars().count(),
        "Processing outgoing message"
    );
    MiddlewareResult::Continue(message)
}

/// Trim whitespace; reject empty and oversized messages
pub fn normalization_middleware(
    mut message: OutgoingMessage,
    _ctx: &SendContext<'_>,
) -> MiddlewareResult {
    let trimmed = message.content.trim();
    if trimmed.is_empty() {
        return MiddlewareResult::Reject(BridgeError::InvalidMessage(
            "message is empty".to_string(),
        ));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_MESSAGE_CHARS {
        return MiddlewareResult::Reject(BridgeError::InvalidMessage(format!(
            "message is {chars} characters, limit is {MAX_MESSAGE_CHARS}"
        )));
    }
    if trimmed.len() != message.content.len() {
        message.content = trimmed.to_string();
    }
    MiddlewareResult::Continue(message)
}

/// Reject modes whose feature flag is off
pub fn feature_gate_middleware(message: OutgoingMessage, ctx: &SendContext<'_>) -> MiddlewareResult {
    if let Some(feature) = message.mode.required_feature() {
        if !ctx.features.is_enabled(feature) {
            tracing::warn!(mode = %message.mode, %feature, "Blocked send: feature disabled");
            return MiddlewareResult::Reject(BridgeError::FeatureDisabled {
                mode: message.mode,
                feature,
            });
        }
    }
    MiddlewareResult::Continue(message)
}
