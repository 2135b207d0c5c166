//! Persistent storage
//!
//! Layout under the data directory:
//!
//! ```text
//! ~/.local/share/chatbridge/
//! ├── local/                 # LocalStorage, one JSON envelope per key
//! │   ├── app_message_queue_<session>.json
//! │   └── app_messages_cache_<session>.json
//! ├── chat.db                # messages, chat_settings, retry_configurations
//! ├── usage.db               # completion usage log
//! └── logs/prompts.jsonl     # redacted prompt log
//! ```

pub mod local;
pub mod sqlite;
pub mod usage;

pub use local::{FileBackend, LocalStorage, MemoryBackend, StorageBackend};
pub use sqlite::{MemoryMessageStore, SqliteStore};
pub use usage::UsageTracker;

use std::path::PathBuf;

/// Platform data directory for chatbridge
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "chatbridge")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chatbridge")
        })
}
