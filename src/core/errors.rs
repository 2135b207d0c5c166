//! Domain error types
//!
//! These errors represent delivery and storage failures, distinct from the
//! provider errors in `llm::LlmError`. Using thiserror for proper Display
//! implementations.

use thiserror::Error;

use super::types::TaskType;

/// Errors from the message send pipeline
#[derive(Debug, Error)]
pub enum SendError {
    /// Per-minute message budget is spent; never retried automatically
    #[error("Rate limit exceeded: {limit} messages per minute")]
    RateLimited { limit: u32 },

    /// Retry budget spent; the message is left in `failed` status
    #[error("Message {id} failed after {attempts} retries")]
    RetriesExhausted { id: String, attempts: u32 },

    /// No message with this id in the session
    #[error("Message not found: {0}")]
    NotFound(String),

    /// Persistence collaborator failure that is not retried
    #[error("Store error: {0}")]
    Store(String),
}

/// Errors from local storage and the SQLite stores
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    /// The backing store is unreachable (offline)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Errors in fallback chain configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// A chain references a model with no provider mapping
    #[error("Model {model} in {task_type} chain has no provider mapping")]
    UnmappedModel { task_type: TaskType, model: String },

    /// A task type has no models to try
    #[error("Fallback chain for {0} is empty")]
    EmptyChain(TaskType),

    /// A configured chain is keyed by something that is not a task type
    #[error("Unknown task type in chain config: {0}")]
    UnknownTaskType(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_messages() {
        let err = SendError::RateLimited { limit: 10 };
        assert_eq!(err.to_string(), "Rate limit exceeded: 10 messages per minute");

        let err = SendError::RetriesExhausted {
            id: "m1".into(),
            attempts: 3,
        };
        assert!(err.to_string().contains("after 3 retries"));
    }

    #[test]
    fn test_chain_error_names_task() {
        let err = ChainError::UnmappedModel {
            task_type: TaskType::CodeGeneration,
            model: "mystery".into(),
        };
        assert_eq!(
            err.to_string(),
            "Model mystery in code_generation chain has no provider mapping"
        );
    }
}
