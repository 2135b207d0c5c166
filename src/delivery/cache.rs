//! Bounded offline mirror of a session's recent messages

use std::sync::Arc;

use crate::core::Message;
use crate::storage::LocalStorage;

/// Per-session message cache in local storage
#[derive(Debug, Clone)]
pub struct MessageCache {
    storage: Arc<LocalStorage>,
    session_id: String,
    max_messages: usize,
}

impl MessageCache {
    pub fn new(storage: Arc<LocalStorage>, session_id: impl Into<String>, max_messages: usize) -> Self {
        Self {
            storage,
            session_id: session_id.into(),
            max_messages,
        }
    }

    pub fn storage_key(&self) -> String {
        format!("messages_cache_{}", self.session_id)
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Keep the first `max_messages` entries; callers pass most-recent-first
    pub fn cache_messages(&self, messages: &[Message]) {
        let kept = &messages[..messages.len().min(self.max_messages)];
        if let Err(e) = self.storage.set_item(&self.storage_key(), &kept, None) {
            tracing::warn!(session_id = %self.session_id, "Failed to cache messages: {}", e);
        }
    }

    /// Cached messages, or empty when nothing usable is stored
    pub fn get_cached_messages(&self) -> Vec<Message> {
        match self.storage.get_item::<Vec<Message>>(&self.storage_key()) {
            Ok(Some(messages)) => messages,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(session_id = %self.session_id, "Error reading cached messages: {}", e);
                Vec::new()
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.storage.remove_item(&self.storage_key()) {
            tracing::warn!(session_id = %self.session_id, "Failed to clear message cache: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MessageRole;
    use crate::storage::{MemoryBackend, StorageBackend};
    use proptest::prelude::*;

    fn messages(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::new("s1", MessageRole::User, format!("message {i}")))
            .collect()
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let cache = MessageCache::new(Arc::new(LocalStorage::in_memory()), "s1", 10);
        assert!(cache.get_cached_messages().is_empty());
    }

    #[test]
    fn test_corrupt_cache_is_empty() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .write("app_messages_cache_s1", "definitely not json")
            .unwrap();
        let storage = Arc::new(LocalStorage::new(backend, "app_"));
        let cache = MessageCache::new(storage, "s1", 10);
        assert!(cache.get_cached_messages().is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = MessageCache::new(Arc::new(LocalStorage::in_memory()), "s1", 10);
        cache.cache_messages(&messages(3));
        cache.clear();
        assert!(cache.get_cached_messages().is_empty());
    }

    #[test]
    fn test_sessions_do_not_share_a_cache() {
        let storage = Arc::new(LocalStorage::in_memory());
        let a = MessageCache::new(Arc::clone(&storage), "a", 10);
        let b = MessageCache::new(storage, "b", 10);
        a.cache_messages(&messages(2));
        assert!(b.get_cached_messages().is_empty());
    }

    proptest! {
        #[test]
        fn prop_cache_keeps_prefix_in_order(len in 0usize..40, max in 0usize..30) {
            let cache = MessageCache::new(Arc::new(LocalStorage::in_memory()), "s1", max);
            let input = messages(len);
            cache.cache_messages(&input);

            let cached = cache.get_cached_messages();
            prop_assert_eq!(cached.len(), len.min(max));
            for (got, want) in cached.iter().zip(&input) {
                prop_assert_eq!(&got.id, &want.id);
            }
        }
    }
}
