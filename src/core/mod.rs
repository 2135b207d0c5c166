//! Core domain modules
//!
//! Types, errors, collaborator traits and the event bus shared by the
//! delivery, llm, storage and bridge layers.

pub mod errors;
pub mod event_bus;
pub mod events;
pub mod tokenizer;
pub mod traits;
pub mod types;

pub use errors::{ChainError, SendError, StorageError};
pub use event_bus::{EventBus, Subscription};
pub use events::{ChatEvent, EventKind, NotificationLevel};
pub use tokenizer::{tokenizer_for, ApproximateTokenizer, WordCountTokenizer};
pub use traits::{MessageStore, SettingsStore, Tokenizer};
pub use types::{
    BridgeState, ChatMode, ChatSettings, ConversationSettings, Feature, FeatureFlags, Message,
    MessageRole, MessageStatus, MessageType, QueueStatus, QueuedMessage, SettingsPatch,
    StatePatch, TaskType,
};
