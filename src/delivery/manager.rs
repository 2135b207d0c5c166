//! Message send pipeline
//!
//! Ties the rate limiter, retry controller, offline queue and cache to the
//! message store for one chat session:
//!
//! 1. reject when the per-minute budget is spent (never retried)
//! 2. add the message to the local list optimistically
//! 3. offline: park it in the queue; online: persist it
//! 4. on a failed persist, schedule a backoff retry or mark it `failed`
//!
//! The local list is the source of truth for status; the store, cache and
//! queue mirror it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use super::cache::MessageCache;
use super::queue::MessageQueue;
use super::rate_limit::RateLimiter;
use super::retry::{RetryConfig, RetryController};
use crate::core::{
    ChatEvent, ChatSettings, EventBus, Message, MessageRole, MessageStatus, MessageStore,
    MessageType, QueueStatus, SendError, StorageError,
};
use crate::storage::LocalStorage;

/// What happened to an accepted message
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Persisted on the first attempt
    Sent(Message),
    /// Parked in the offline queue
    Queued(Message),
    /// First attempt failed; a retry fires after `delay`
    RetryScheduled { message: Message, delay: Duration },
}

impl SendOutcome {
    pub fn message(&self) -> &Message {
        match self {
            Self::Sent(m) | Self::Queued(m) => m,
            Self::RetryScheduled { message, .. } => message,
        }
    }
}

/// Result of replaying the offline queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
    pub remaining: usize,
}

struct Inner {
    session_id: String,
    store: Arc<dyn MessageStore>,
    events: EventBus,
    limiter: Arc<RateLimiter>,
    retry: RetryController,
    queue: MessageQueue,
    cache: MessageCache,
    /// Local list, oldest first
    messages: RwLock<Vec<Message>>,
    online: AtomicBool,
    shut_down: AtomicBool,
    reset_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Per-session message manager; cheap to clone
#[derive(Clone)]
pub struct MessageManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MessageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageManager")
            .field("session_id", &self.inner.session_id)
            .field("online", &self.is_online())
            .finish()
    }
}

impl MessageManager {
    pub fn new(
        session_id: impl Into<String>,
        store: Arc<dyn MessageStore>,
        storage: Arc<LocalStorage>,
        events: EventBus,
        chat: ChatSettings,
        retry: RetryConfig,
    ) -> Self {
        let session_id = session_id.into();
        let queue = MessageQueue::new(Arc::clone(&storage), events.clone(), session_id.clone());
        let cache = MessageCache::new(storage, session_id.clone(), chat.max_offline_messages);
        Self {
            inner: Arc::new(Inner {
                session_id,
                store,
                events,
                limiter: Arc::new(RateLimiter::new(chat.rate_limit_per_minute)),
                retry: RetryController::new(retry),
                queue,
                cache,
                messages: RwLock::new(Vec::new()),
                online: AtomicBool::new(true),
                shut_down: AtomicBool::new(false),
                reset_timer: Mutex::new(None),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.limiter
    }

    pub fn retry_controller(&self) -> &RetryController {
        &self.inner.retry
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.inner.queue
    }

    pub fn cache(&self) -> &MessageCache {
        &self.inner.cache
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Start the fixed rate window timer (replaces a running one)
    pub fn start_rate_window(&self, window: Duration) {
        let handle = self.inner.limiter.spawn_reset_timer(window);
        if let Ok(mut slot) = self.inner.reset_timer.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Send a user message through the full pipeline
    pub async fn send_message(
        &self,
        content: &str,
        message_type: MessageType,
    ) -> Result<SendOutcome, SendError> {
        let limiter = &self.inner.limiter;
        if !limiter.check_rate_limit() {
            tracing::warn!(session_id = %self.inner.session_id, limit = limiter.limit(), "Rate limit exceeded");
            self.inner.events.emit(ChatEvent::error(
                "Rate limit exceeded. Please wait before sending more messages.",
            ));
            return Err(SendError::RateLimited {
                limit: limiter.limit(),
            });
        }

        let message =
            Message::new(&self.inner.session_id, MessageRole::User, content).with_type(message_type);
        self.push_local(message.clone());

        let outcome = if self.is_online() {
            self.deliver(message).await
        } else {
            self.inner.queue.add_to_queue(&message);
            Ok(SendOutcome::Queued(message))
        };

        if outcome.is_ok() {
            limiter.increment_message_count();
        }
        self.refresh_cache();
        outcome
    }

    /// Record a message that is not subject to the rate limit (assistant replies)
    pub async fn record_message(
        &self,
        role: MessageRole,
        content: &str,
        message_type: MessageType,
    ) -> Result<SendOutcome, SendError> {
        let message = Message::new(&self.inner.session_id, role, content).with_type(message_type);
        self.push_local(message.clone());

        let outcome = if self.is_online() {
            self.deliver(message).await
        } else {
            self.inner.queue.add_to_queue(&message);
            Ok(SendOutcome::Queued(message))
        };
        self.refresh_cache();
        outcome
    }

    /// Snapshot of the local list, oldest first
    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .messages
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn get_message(&self, id: &str) -> Option<Message> {
        self.inner
            .messages
            .read()
            .ok()
            .and_then(|m| m.iter().find(|m| m.id == id).cloned())
    }

    /// Load history from the store, falling back to the offline cache
    pub async fn load_history(&self) -> Vec<Message> {
        let history = match self.inner.store.list_messages(&self.inner.session_id).await {
            Ok(history) => {
                tracing::debug!(session_id = %self.inner.session_id, count = history.len(), "Loaded message history");
                history
            }
            Err(e) => {
                tracing::warn!(session_id = %self.inner.session_id, "Failed to load history, using cache: {}", e);
                let mut cached = self.inner.cache.get_cached_messages();
                cached.reverse();
                cached
            }
        };

        if let Ok(mut messages) = self.inner.messages.write() {
            *messages = history.clone();
        }
        self.refresh_cache();
        history
    }

    /// Manually retry a message, with a fresh retry budget
    pub async fn retry_message(&self, id: &str) -> Result<SendOutcome, SendError> {
        self.inner.retry.cancel(id);
        let message = self
            .update_local(id, |m| {
                m.retry_count = 0;
                m.last_retry = None;
                m.set_status(MessageStatus::Pending);
            })
            .ok_or_else(|| SendError::NotFound(id.to_string()))?;
        self.emit_status(&message);

        let outcome = if self.is_online() {
            self.deliver(message).await
        } else {
            self.inner.queue.add_to_queue(&message);
            Ok(SendOutcome::Queued(message))
        };
        self.refresh_cache();
        outcome
    }

    pub async fn delete_message(&self, id: &str) -> Result<(), SendError> {
        self.inner.retry.cancel(id);
        let removed = match self.inner.messages.write() {
            Ok(mut messages) => {
                let before = messages.len();
                messages.retain(|m| m.id != id);
                before != messages.len()
            }
            Err(_) => false,
        };
        if !removed {
            return Err(SendError::NotFound(id.to_string()));
        }
        self.inner.queue.remove_from_queue(id);
        self.refresh_cache();

        self.inner
            .store
            .delete_message(id)
            .await
            .map_err(|e| SendError::Store(e.to_string()))
    }

    /// Drop every message of the session, locally and in the store
    pub async fn clear(&self) -> Result<usize, SendError> {
        self.inner.retry.cancel_all();
        if let Ok(mut messages) = self.inner.messages.write() {
            messages.clear();
        }
        self.inner.queue.clear();
        self.inner.cache.clear();
        self.inner.events.emit(ChatEvent::MessagesCleared {
            session_id: self.inner.session_id.clone(),
        });

        self.inner
            .store
            .delete_session_messages(&self.inner.session_id)
            .await
            .map_err(|e| SendError::Store(e.to_string()))
    }

    /// Switch connectivity; coming back online replays the queue
    pub async fn set_online(&self, online: bool) -> Option<FlushReport> {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return None;
        }
        tracing::info!(session_id = %self.inner.session_id, online, "Connectivity changed");
        self.inner
            .events
            .emit(ChatEvent::ConnectivityChanged { online });

        if online {
            Some(self.flush_queue().await)
        } else {
            None
        }
    }

    /// Replay pending queue entries in order
    pub async fn flush_queue(&self) -> FlushReport {
        let max_retries = self.inner.retry.config().max_retries;
        let mut report = FlushReport::default();

        for queued in self.inner.queue.pending() {
            if !self.is_online() {
                report.remaining += 1;
                continue;
            }

            let attempts = queued.attempts + 1;
            let message = match self.get_message(&queued.id) {
                Some(message) => message,
                None => {
                    // Survived a restart: rebuild from the queue entry
                    let message = queued.to_message(&self.inner.session_id);
                    self.push_local(message.clone());
                    message
                }
            };

            match self.persist(&message).await {
                Ok(()) => {
                    self.inner.queue.remove_from_queue(&queued.id);
                    self.mark_sent(&queued.id);
                    report.sent += 1;
                }
                Err(e) if attempts >= max_retries => {
                    tracing::warn!(message_id = %queued.id, attempts, "Queued message failed: {}", e);
                    self.inner
                        .queue
                        .update_message_status(&queued.id, QueueStatus::Failed, Some(attempts));
                    self.mark_failed(&queued.id).await;
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::debug!(message_id = %queued.id, attempts, "Queued message still undeliverable: {}", e);
                    self.inner
                        .queue
                        .update_message_status(&queued.id, QueueStatus::Pending, Some(attempts));
                    report.remaining += 1;
                }
            }
        }

        self.refresh_cache();
        self.inner.events.emit(ChatEvent::QueueFlushed {
            sent: report.sent,
            failed: report.failed,
            remaining: report.remaining,
        });
        report
    }

    /// Cancel all retries and stop the rate window; nothing fires afterwards
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        let cancelled = self.inner.retry.cancel_all();
        if let Ok(mut slot) = self.inner.reset_timer.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        tracing::debug!(session_id = %self.inner.session_id, cancelled, "Message manager shut down");
    }

    // ========== Delivery ==========

    async fn deliver(&self, message: Message) -> Result<SendOutcome, SendError> {
        match self.persist(&message).await {
            Ok(()) => {
                let message = self.mark_sent(&message.id).unwrap_or(message);
                Ok(SendOutcome::Sent(message))
            }
            Err(e) => self.handle_failure(&message.id, e).await,
        }
    }

    /// Persist the delivered form of a message
    async fn persist(&self, message: &Message) -> Result<(), StorageError> {
        let mut delivered = message.clone();
        delivered.set_status(MessageStatus::Sent);
        self.inner.store.insert_message(&delivered).await
    }

    async fn handle_failure(&self, id: &str, error: StorageError) -> Result<SendOutcome, SendError> {
        let Some(current) = self.get_message(id) else {
            return Err(SendError::NotFound(id.to_string()));
        };

        if self.inner.retry.should_retry(&current) && !self.inner.shut_down.load(Ordering::SeqCst) {
            let delay = self.inner.retry.calculate_retry_delay(current.retry_count);
            tracing::warn!(
                message_id = id,
                attempt = current.retry_count,
                delay_ms = delay.as_millis() as u64,
                "Message delivery failed, retrying: {}",
                error
            );
            let message = self
                .update_local(id, |m| m.set_status(MessageStatus::Error))
                .unwrap_or(current);
            self.emit_status(&message);
            self.inner.events.emit(ChatEvent::RetryScheduled {
                id: id.to_string(),
                attempt: message.retry_count + 1,
                delay_ms: delay.as_millis() as u64,
            });
            self.schedule_retry(id, delay);
            return Ok(SendOutcome::RetryScheduled { message, delay });
        }

        tracing::error!(message_id = id, attempts = current.retry_count, "Message delivery failed permanently: {}", error);
        self.mark_failed(id).await;
        self.inner.events.emit(ChatEvent::error(
            "Failed to send message after multiple attempts. Please try again later.",
        ));
        Err(SendError::RetriesExhausted {
            id: id.to_string(),
            attempts: current.retry_count,
        })
    }

    fn schedule_retry(&self, id: &str, delay: Duration) {
        let manager = self.clone();
        let message_id = id.to_string();
        let task: BoxFuture<'static, ()> = Box::pin(async move {
            manager.run_retry(message_id).await;
        });
        self.inner.retry.schedule(id, delay, task);
    }

    async fn run_retry(&self, id: String) {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return;
        }
        if !self.is_online() {
            if let Some(message) = self.get_message(&id) {
                tracing::debug!(message_id = %id, "Offline at retry time, queueing instead");
                self.inner.queue.add_to_queue(&message);
            }
            return;
        }

        let Some(message) = self.update_local(&id, |m| {
            m.retry_count += 1;
            m.last_retry = Some(Utc::now());
        }) else {
            return;
        };
        tracing::info!(message_id = %id, attempt = message.retry_count, "Retrying message delivery");

        match self.persist(&message).await {
            Ok(()) => {
                self.mark_sent(&id);
            }
            Err(e) => {
                // Exhaustion is already logged and surfaced as a notification
                let _ = self.handle_failure(&id, e).await;
            }
        }
        self.refresh_cache();
    }

    // ========== Local state ==========

    fn push_local(&self, message: Message) {
        if let Ok(mut messages) = self.inner.messages.write() {
            messages.push(message.clone());
        }
        self.inner.events.emit(ChatEvent::MessageAdded(message));
    }

    fn update_local(&self, id: &str, f: impl FnOnce(&mut Message)) -> Option<Message> {
        let mut messages = self.inner.messages.write().ok()?;
        let message = messages.iter_mut().find(|m| m.id == id)?;
        f(message);
        Some(message.clone())
    }

    fn mark_sent(&self, id: &str) -> Option<Message> {
        let message = self.update_local(id, |m| m.set_status(MessageStatus::Sent))?;
        self.emit_status(&message);
        Some(message)
    }

    async fn mark_failed(&self, id: &str) {
        let Some(message) = self.update_local(id, |m| m.set_status(MessageStatus::Failed)) else {
            return;
        };
        self.emit_status(&message);
        // Best effort: the store may be the thing that is failing
        if let Err(e) = self.inner.store.insert_message(&message).await {
            tracing::debug!(message_id = id, "Could not persist failed status: {}", e);
        }
    }

    fn emit_status(&self, message: &Message) {
        self.inner.events.emit(ChatEvent::MessageStatusChanged {
            id: message.id.clone(),
            status: message.status,
            retry_count: message.retry_count,
        });
    }

    /// Mirror the local list into the cache, most recent first
    fn refresh_cache(&self) {
        let mut recent = self.messages();
        recent.reverse();
        self.inner.cache.cache_messages(&recent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventKind;
    use crate::storage::MemoryMessageStore;
    use std::sync::atomic::AtomicUsize;

    fn manager_with(
        store: Arc<MemoryMessageStore>,
        chat: ChatSettings,
        retry: RetryConfig,
    ) -> MessageManager {
        MessageManager::new(
            "s1",
            store,
            Arc::new(LocalStorage::in_memory()),
            EventBus::new(),
            chat,
            retry,
        )
    }

    fn manager(store: Arc<MemoryMessageStore>) -> MessageManager {
        manager_with(store, ChatSettings::default(), RetryConfig::default())
    }

    #[tokio::test]
    async fn test_send_persists_and_marks_sent() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = manager(Arc::clone(&store));

        let outcome = manager.send_message("hello", MessageType::Text).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(_)));
        assert_eq!(outcome.message().status, MessageStatus::Sent);
        assert_eq!(store.snapshot()[0].status, MessageStatus::Sent);
        assert_eq!(manager.rate_limiter().message_count(), 1);
        assert_eq!(manager.cache().get_cached_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_without_incrementing() {
        let store = Arc::new(MemoryMessageStore::new());
        let chat = ChatSettings {
            rate_limit_per_minute: 2,
            ..ChatSettings::default()
        };
        let manager = manager_with(Arc::clone(&store), chat, RetryConfig::default());

        manager.send_message("one", MessageType::Text).await.unwrap();
        manager.send_message("two", MessageType::Text).await.unwrap();
        let third = manager.send_message("three", MessageType::Text).await;

        assert!(matches!(third, Err(SendError::RateLimited { limit: 2 })));
        assert_eq!(manager.rate_limiter().message_count(), 2);
        assert_eq!(manager.messages().len(), 2);
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_offline_send_is_queued() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = manager(Arc::clone(&store));
        manager.set_online(false).await;

        let outcome = manager.send_message("later", MessageType::Text).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Queued(_)));
        assert_eq!(store.insert_calls(), 0);
        assert_eq!(manager.queue().pending().len(), 1);
        assert_eq!(manager.rate_limiter().message_count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_flushes_queue() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = manager(Arc::clone(&store));
        manager.set_online(false).await;
        manager.send_message("a", MessageType::Text).await.unwrap();
        manager.send_message("b", MessageType::Text).await.unwrap();

        let report = manager.set_online(true).await.unwrap();
        assert_eq!(
            report,
            FlushReport {
                sent: 2,
                failed: 0,
                remaining: 0
            }
        );
        assert!(manager.queue().is_empty());
        assert!(manager
            .messages()
            .iter()
            .all(|m| m.status == MessageStatus::Sent));
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_set_online_same_state_is_noop() {
        let manager = manager(Arc::new(MemoryMessageStore::new()));
        assert!(manager.set_online(true).await.is_none());
    }

    #[tokio::test]
    async fn test_flush_marks_failed_after_max_attempts() {
        let store = Arc::new(MemoryMessageStore::new());
        let retry = RetryConfig {
            max_retries: 1,
            ..RetryConfig::default()
        };
        let manager = manager_with(Arc::clone(&store), ChatSettings::default(), retry);
        manager.set_online(false).await;
        let sent = manager.send_message("doomed", MessageType::Text).await.unwrap();

        store.fail_next_inserts(5);
        let report = manager.set_online(true).await.unwrap();
        assert_eq!(report.failed, 1);

        let queued = &manager.queue().queued_messages()[0];
        assert_eq!(queued.status, QueueStatus::Failed);
        assert_eq!(queued.attempts, 1);
        assert_eq!(
            manager.get_message(&sent.message().id).unwrap().status,
            MessageStatus::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_with_backoff() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = manager(Arc::clone(&store));
        store.fail_next_inserts(2);

        let outcome = manager.send_message("flaky", MessageType::Text).await.unwrap();
        let SendOutcome::RetryScheduled { message, delay } = outcome else {
            panic!("expected a scheduled retry");
        };
        assert_eq!(delay, Duration::from_millis(1000));
        assert_eq!(
            manager.get_message(&message.id).unwrap().status,
            MessageStatus::Error
        );

        // first retry at 1s fails, second at 1s + 2s succeeds
        tokio::time::sleep(Duration::from_millis(3500)).await;
        let delivered = manager.get_message(&message.id).unwrap();
        assert_eq!(delivered.status, MessageStatus::Sent);
        assert_eq!(delivered.retry_count, 2);
        assert!(delivered.last_retry.is_some());
        assert_eq!(store.insert_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_mark_failed() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = manager(Arc::clone(&store));
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let _sub = manager.inner.events.on(EventKind::Notification, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.fail_next_inserts(100);
        let outcome = manager.send_message("never", MessageType::Text).await.unwrap();
        let id = outcome.message().id.clone();

        // 1s + 2s + 4s of backoff
        tokio::time::sleep(Duration::from_secs(8)).await;
        let failed = manager.get_message(&id).unwrap();
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert_eq!(manager.retry_controller().pending_count(), 0);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_retries() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = manager(Arc::clone(&store));
        store.fail_next_inserts(1);

        manager.send_message("stop", MessageType::Text).await.unwrap();
        assert_eq!(manager.retry_controller().pending_count(), 1);
        manager.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_retry_budget_fails_immediately() {
        let store = Arc::new(MemoryMessageStore::new());
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        let manager = manager_with(Arc::clone(&store), ChatSettings::default(), retry);
        store.fail_next_inserts(1);

        let result = manager.send_message("once", MessageType::Text).await;
        assert!(matches!(result, Err(SendError::RetriesExhausted { attempts: 0, .. })));
        assert_eq!(manager.rate_limiter().message_count(), 0);
        assert_eq!(manager.messages()[0].status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_manual_retry_resets_budget() {
        let store = Arc::new(MemoryMessageStore::new());
        let retry = RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        };
        let manager = manager_with(Arc::clone(&store), ChatSettings::default(), retry);
        store.fail_next_inserts(1);
        let _ = manager.send_message("again", MessageType::Text).await;
        let id = manager.messages()[0].id.clone();

        let outcome = manager.retry_message(&id).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(_)));
        assert_eq!(outcome.message().retry_count, 0);

        assert!(matches!(
            manager.retry_message("missing").await,
            Err(SendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_load_history_falls_back_to_cache() {
        let store = Arc::new(MemoryMessageStore::new());
        let storage = Arc::new(LocalStorage::in_memory());
        let first = MessageManager::new(
            "s1",
            Arc::clone(&store) as Arc<dyn MessageStore>,
            Arc::clone(&storage),
            EventBus::new(),
            ChatSettings::default(),
            RetryConfig::default(),
        );
        first.send_message("one", MessageType::Text).await.unwrap();
        first.send_message("two", MessageType::Text).await.unwrap();

        store.set_online(false);
        let second = MessageManager::new(
            "s1",
            Arc::clone(&store) as Arc<dyn MessageStore>,
            storage,
            EventBus::new(),
            ChatSettings::default(),
            RetryConfig::default(),
        );
        let history = second.load_history().await;
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_clear_and_delete() {
        let store = Arc::new(MemoryMessageStore::new());
        let manager = manager(Arc::clone(&store));
        let kept = manager.send_message("keep", MessageType::Text).await.unwrap();
        let dropped = manager.send_message("drop", MessageType::Text).await.unwrap();

        manager.delete_message(&dropped.message().id).await.unwrap();
        assert_eq!(manager.messages().len(), 1);
        assert_eq!(store.snapshot()[0].id, kept.message().id);

        assert_eq!(manager.clear().await.unwrap(), 1);
        assert!(manager.messages().is_empty());
        assert!(manager.cache().get_cached_messages().is_empty());
    }

    #[tokio::test]
    async fn test_record_message_ignores_rate_limit() {
        let store = Arc::new(MemoryMessageStore::new());
        let chat = ChatSettings {
            rate_limit_per_minute: 0,
            ..ChatSettings::default()
        };
        let manager = manager_with(Arc::clone(&store), chat, RetryConfig::default());
        let outcome = manager
            .record_message(MessageRole::Assistant, "reply", MessageType::Text)
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Sent(_)));
        assert_eq!(manager.rate_limiter().message_count(), 0);
    }
}
