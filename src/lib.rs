//! chatbridge: message delivery, retry and provider fallback for AI chat
//!
//! This library provides:
//! - A per-session send pipeline with rate limiting, an offline queue, a
//!   bounded offline cache and cancellable exponential-backoff retries
//! - Per-task fallback chains across OpenAI, Anthropic and OpenRouter models
//! - A bridge façade with typed events for front-ends
//! - SQLite persistence, usage accounting and a JSONL prompt log

pub mod bridge;
pub mod cli;
pub mod config;
pub mod core;
pub mod delivery;
pub mod llm;
pub mod prompt_log;
pub mod storage;

pub use bridge::{BridgeError, ChatBridge, ChatBridgeBuilder, SendReport};
pub use config::Config;
pub use delivery::{MessageManager, RetryConfig, SendOutcome};
pub use llm::{LlmProvider, ModelRouter, RouterError};
