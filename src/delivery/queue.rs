//! Offline message queue
//!
//! Messages sent while offline are parked here, one JSON array per session,
//! and replayed by the manager on reconnect. All writes are best effort:
//! storage failures are logged and never reach the caller.

use std::sync::Arc;

use crate::core::{ChatEvent, EventBus, Message, QueueStatus, QueuedMessage};
use crate::storage::LocalStorage;

#[derive(Debug, Clone)]
pub struct MessageQueue {
    storage: Arc<LocalStorage>,
    events: EventBus,
    session_id: String,
}

impl MessageQueue {
    pub fn new(storage: Arc<LocalStorage>, events: EventBus, session_id: impl Into<String>) -> Self {
        Self {
            storage,
            events,
            session_id: session_id.into(),
        }
    }

    pub fn storage_key(&self) -> String {
        format!("message_queue_{}", self.session_id)
    }

    /// Park a message with zero attempts and notify the user
    pub fn add_to_queue(&self, message: &Message) {
        let queued = QueuedMessage::from_message(message);
        self.mutate(|queue| {
            queue.retain(|m| m.id != queued.id);
            queue.push(queued.clone());
        });

        tracing::info!(session_id = %self.session_id, message_id = %message.id, "Message queued for later delivery");
        self.events.emit(ChatEvent::MessageQueued {
            id: message.id.clone(),
        });
        self.events
            .emit(ChatEvent::info("Message queued. Will send when back online."));
    }

    pub fn remove_from_queue(&self, message_id: &str) {
        self.mutate(|queue| queue.retain(|m| m.id != message_id));
    }

    /// Set the status (and optionally the attempt count) of one entry
    pub fn update_message_status(&self, message_id: &str, status: QueueStatus, attempts: Option<u32>) {
        self.mutate(|queue| {
            if let Some(entry) = queue.iter_mut().find(|m| m.id == message_id) {
                entry.status = status;
                if let Some(attempts) = attempts {
                    entry.attempts = attempts;
                }
            }
        });
    }

    /// Every queued entry, oldest first
    pub fn queued_messages(&self) -> Vec<QueuedMessage> {
        match self.storage.get_item::<Vec<QueuedMessage>>(&self.storage_key()) {
            Ok(queue) => queue.unwrap_or_default(),
            Err(e) => {
                tracing::error!(session_id = %self.session_id, "Error reading message queue: {}", e);
                Vec::new()
            }
        }
    }

    /// Entries still waiting to be replayed
    pub fn pending(&self) -> Vec<QueuedMessage> {
        self.queued_messages()
            .into_iter()
            .filter(|m| m.status == QueueStatus::Pending)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.queued_messages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove_item(&self.storage_key()) {
            tracing::warn!(session_id = %self.session_id, "Failed to clear message queue: {}", e);
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut Vec<QueuedMessage>)) {
        if let Err(e) = self
            .storage
            .update::<Vec<QueuedMessage>, _>(&self.storage_key(), None, f)
        {
            tracing::warn!(session_id = %self.session_id, "Failed to persist message queue: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventKind, MessageRole};
    use crate::storage::{MemoryBackend, StorageBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn queue() -> (MessageQueue, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let storage = Arc::new(LocalStorage::new(backend.clone(), "app_"));
        (MessageQueue::new(storage, EventBus::new(), "s1"), backend)
    }

    #[test]
    fn test_add_to_queue_persists_pending_entry() {
        let (queue, backend) = queue();
        let message = Message::new("s1", MessageRole::User, "offline hello");
        queue.add_to_queue(&message);

        let raw = backend.read("app_message_queue_s1").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entries = json["value"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["id"], message.id.as_str());
        assert_eq!(entries[0]["status"], "pending");
        assert_eq!(entries[0]["attempts"], 0);
    }

    #[test]
    fn test_add_emits_notification() {
        let storage = Arc::new(LocalStorage::in_memory());
        let events = EventBus::new();
        let notes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notes);
        let _sub = events.on(EventKind::Notification, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let queue = MessageQueue::new(storage, events, "s1");
        queue.add_to_queue(&Message::new("s1", MessageRole::User, "x"));
        assert_eq!(notes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_and_remove() {
        let (queue, _) = queue();
        let a = Message::new("s1", MessageRole::User, "a");
        let b = Message::new("s1", MessageRole::User, "b");
        queue.add_to_queue(&a);
        queue.add_to_queue(&b);

        queue.update_message_status(&a.id, QueueStatus::Failed, Some(3));
        let pending = queue.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);

        let failed = &queue.queued_messages()[0];
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.attempts, 3);

        // attempts untouched when not given
        queue.update_message_status(&a.id, QueueStatus::Pending, None);
        assert_eq!(queue.queued_messages()[0].attempts, 3);

        queue.remove_from_queue(&a.id);
        assert_eq!(queue.len(), 1);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_same_id_does_not_duplicate() {
        let (queue, _) = queue();
        let message = Message::new("s1", MessageRole::User, "again");
        queue.add_to_queue(&message);
        queue.add_to_queue(&message);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_corrupt_queue_reads_empty_and_recovers() {
        let (queue, backend) = queue();
        backend.write("app_message_queue_s1", "[[[").unwrap();
        assert!(queue.queued_messages().is_empty());

        queue.add_to_queue(&Message::new("s1", MessageRole::User, "fresh"));
        assert_eq!(queue.len(), 1);
    }
}
