//! Core traits for the domain layer
//!
//! These traits define the collaborators the delivery and routing code
//! depends on, allowing infrastructure to be injected and tests to use mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::StorageError;
use super::types::{ChatSettings, Message, MessageStatus};
use crate::delivery::RetryConfig;

/// Tokenizer for counting tokens in text
///
/// Provider-reported usage always wins; a tokenizer only fills in counts a
/// provider did not report.
pub trait Tokenizer: Send + Sync {
    /// Count tokens in a text string
    fn count_tokens(&self, text: &str) -> usize;

    /// Count tokens for a message (includes role and formatting overhead)
    fn count_message_tokens(&self, _role: &str, content: &str) -> usize {
        // {"role": "user", "content": "..."}
        let overhead = 20;
        overhead + self.count_tokens(content)
    }
}

/// Server-side message persistence
///
/// The canonical copy of every message lives behind this trait; the local
/// list, cache and queue are mirrors.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace a message row
    async fn insert_message(&self, message: &Message) -> Result<(), StorageError>;

    /// Update status and retry bookkeeping of an existing row
    async fn update_message_status(
        &self,
        id: &str,
        status: MessageStatus,
        retry_count: u32,
        last_retry: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError>;

    /// All messages of a session, oldest first
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError>;

    /// Delete one message
    async fn delete_message(&self, id: &str) -> Result<(), StorageError>;

    /// Delete every message of a session, returning how many were removed
    async fn delete_session_messages(&self, session_id: &str) -> Result<usize, StorageError>;
}

/// Per-user settings persistence (`chat_settings` and `retry_configurations`)
pub trait SettingsStore: Send + Sync {
    /// Load chat settings, `None` when the user has no row
    fn load_chat_settings(&self, user_id: &str) -> Result<Option<ChatSettings>, StorageError>;

    /// Load the retry policy, `None` when the user has no row
    fn load_retry_config(&self, user_id: &str) -> Result<Option<RetryConfig>, StorageError>;

    fn save_chat_settings(&self, user_id: &str, settings: &ChatSettings)
        -> Result<(), StorageError>;

    fn save_retry_config(&self, user_id: &str, config: &RetryConfig) -> Result<(), StorageError>;
}
