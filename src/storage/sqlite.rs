//! SQLite persistence for messages and per-user settings
//!
//! Tables: `messages`, `chat_settings`, `retry_configurations`.
//! [`MemoryMessageStore`] is the in-process stand-in used by the demo mode
//! and tests; it can be switched offline to exercise the queue and retries.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::core::{
    ChatSettings, Message, MessageRole, MessageStatus, MessageStore, MessageType, SettingsStore,
    StorageError,
};
use crate::delivery::RetryConfig;

/// SQLite-backed message and settings store
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                chat_session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_retry TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(chat_session_id, created_at);
            CREATE TABLE IF NOT EXISTS chat_settings (
                user_id TEXT PRIMARY KEY,
                rate_limit_per_minute INTEGER NOT NULL,
                max_offline_messages INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS retry_configurations (
                user_id TEXT PRIMARY KEY,
                max_retries INTEGER NOT NULL,
                initial_delay_ms INTEGER NOT NULL,
                max_delay_ms INTEGER NOT NULL,
                backoff_factor REAL NOT NULL
            );",
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.db
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".into()))
    }
}

/// Fixed-width RFC 3339 so `ORDER BY created_at` sorts chronologically
fn fmt_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_enum<T>(raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let last_retry: Option<String> = row.get(7)?;
    Ok(Message {
        id: row.get(0)?,
        chat_session_id: row.get(1)?,
        role: parse_enum::<MessageRole>(&row.get::<_, String>(2)?)?,
        content: row.get(3)?,
        message_type: parse_enum::<MessageType>(&row.get::<_, String>(4)?)?,
        status: parse_enum::<MessageStatus>(&row.get::<_, String>(5)?)?,
        retry_count: row.get(6)?,
        last_retry: last_retry.as_deref().map(parse_time).transpose()?,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
        updated_at: parse_time(&row.get::<_, String>(9)?)?,
    })
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO messages
             (id, chat_session_id, role, content, type, status, retry_count, last_retry,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &message.id,
                &message.chat_session_id,
                message.role.as_str(),
                &message.content,
                message.message_type.as_str(),
                message.status.as_str(),
                message.retry_count,
                message.last_retry.map(fmt_time),
                fmt_time(message.created_at),
                fmt_time(message.updated_at),
            ],
        )?;
        Ok(())
    }

    async fn update_message_status(
        &self,
        id: &str,
        status: MessageStatus,
        retry_count: u32,
        last_retry: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE messages
             SET status = ?2, retry_count = ?3, last_retry = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                status.as_str(),
                retry_count,
                last_retry.map(fmt_time),
                fmt_time(Utc::now()),
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::Database(format!("no message with id {id}")));
        }
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, chat_session_id, role, content, type, status, retry_count, last_retry,
                    created_at, updated_at
             FROM messages
             WHERE chat_session_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([session_id], row_to_message)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn delete_message(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM messages WHERE id = ?1", [id])?;
        Ok(())
    }

    async fn delete_session_messages(&self, session_id: &str) -> Result<usize, StorageError> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM messages WHERE chat_session_id = ?1",
            [session_id],
        )?)
    }
}

impl SettingsStore for SqliteStore {
    fn load_chat_settings(&self, user_id: &str) -> Result<Option<ChatSettings>, StorageError> {
        let conn = self.conn()?;
        let settings = conn
            .query_row(
                "SELECT rate_limit_per_minute, max_offline_messages
                 FROM chat_settings WHERE user_id = ?1",
                [user_id],
                |row| {
                    let max_offline: i64 = row.get(1)?;
                    Ok(ChatSettings {
                        rate_limit_per_minute: row.get(0)?,
                        max_offline_messages: usize::try_from(max_offline).unwrap_or(0),
                    })
                },
            )
            .optional()?;
        Ok(settings)
    }

    fn load_retry_config(&self, user_id: &str) -> Result<Option<RetryConfig>, StorageError> {
        let conn = self.conn()?;
        let config = conn
            .query_row(
                "SELECT max_retries, initial_delay_ms, max_delay_ms, backoff_factor
                 FROM retry_configurations WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(RetryConfig {
                        max_retries: row.get(0)?,
                        initial_delay_ms: row.get(1)?,
                        max_delay_ms: row.get(2)?,
                        backoff_factor: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(config)
    }

    fn save_chat_settings(
        &self,
        user_id: &str,
        settings: &ChatSettings,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO chat_settings
             (user_id, rate_limit_per_minute, max_offline_messages)
             VALUES (?1, ?2, ?3)",
            params![
                user_id,
                settings.rate_limit_per_minute,
                i64::try_from(settings.max_offline_messages).unwrap_or(i64::MAX),
            ],
        )?;
        Ok(())
    }

    fn save_retry_config(&self, user_id: &str, config: &RetryConfig) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO retry_configurations
             (user_id, max_retries, initial_delay_ms, max_delay_ms, backoff_factor)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                config.max_retries,
                config.initial_delay_ms,
                config.max_delay_ms,
                config.backoff_factor,
            ],
        )?;
        Ok(())
    }
}

/// In-memory message store with an online switch and injectable failures
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<Message>>,
    offline: AtomicBool,
    fail_next: AtomicU32,
    insert_calls: AtomicU32,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StorageError::Unavailable`]
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Fail the next `n` inserts, then recover
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of `insert_message` calls seen, including failed ones
    pub fn insert_calls(&self) -> u32 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of every stored message
    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_online(&self) -> Result<(), StorageError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StorageError::Unavailable("message store is offline".into()))
        }
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert_message(&self, message: &Message) -> Result<(), StorageError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable("injected failure".into()));
        }

        let mut messages = self.lock();
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    async fn update_message_status(
        &self,
        id: &str,
        status: MessageStatus,
        retry_count: u32,
        last_retry: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        self.check_online()?;
        let mut messages = self.lock();
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StorageError::Database(format!("no message with id {id}")))?;
        message.status = status;
        message.retry_count = retry_count;
        message.last_retry = last_retry;
        message.updated_at = Utc::now();
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        self.check_online()?;
        Ok(self
            .lock()
            .iter()
            .filter(|m| m.chat_session_id == session_id)
            .cloned()
            .collect())
    }

    async fn delete_message(&self, id: &str) -> Result<(), StorageError> {
        self.check_online()?;
        self.lock().retain(|m| m.id != id);
        Ok(())
    }

    async fn delete_session_messages(&self, session_id: &str) -> Result<usize, StorageError> {
        self.check_online()?;
        let mut messages = self.lock();
        let before = messages.len();
        messages.retain(|m| m.chat_session_id != session_id);
        Ok(before - messages.len())
    }
}
