//! Completion response caching
//!
//! Keyed by task type plus the first 100 characters of the prompt, so two
//! prompts sharing a long prefix share an entry.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::TaskType;

/// Characters of the prompt that take part in the key
pub const KEY_PROMPT_CHARS: usize = 100;

/// A cached successful answer
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub content: String,
    pub model: String,
    pub provider: String,
}

struct CacheEntry {
    response: CachedResponse,
    created_at: Instant,
    hits: usize,
}

/// A simple LRU-ish cache for completions
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ResponseCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            ttl: Duration::from_secs(300),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// `"<task_type>:<first 100 chars of prompt>"`
    pub fn key(task_type: TaskType, prompt: &str) -> String {
        let head: String = prompt.chars().take(KEY_PROMPT_CHARS).collect();
        format!("{}:{}", task_type.as_str(), head)
    }

    /// Get a cached response if available
    pub fn get(&self, task_type: TaskType, prompt: &str) -> Option<CachedResponse> {
        let key = Self::key(task_type, prompt);
        let mut entries = self.entries.write().ok()?;

        if let Some(entry) = entries.get_mut(&key) {
            if entry.created_at.elapsed() < self.ttl {
                entry.hits += 1;
                return Some(entry.response.clone());
            }
            entries.remove(&key);
        }

        None
    }

    /// Store a response in the cache
    pub fn put(&self, task_type: TaskType, prompt: &str, response: CachedResponse) {
        if self.max_size == 0 {
            return;
        }
        let key = Self::key(task_type, prompt);

        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= self.max_size && !entries.contains_key(&key) {
                self.evict(&mut entries);
            }

            entries.insert(
                key,
                CacheEntry {
                    response,
                    created_at: Instant::now(),
                    hits: 0,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    fn evict(&self, entries: &mut HashMap<String, CacheEntry>) {
        // Remove expired entries first
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.created_at) < self.ttl);

        // Still full: drop the entry with fewest hits, oldest first
        if entries.len() >= self.max_size {
            if let Some(key_to_remove) = entries
                .iter()
                .min_by_key(|(_, entry)| (entry.hits, entry.created_at))
                .map(|(key, _)| key.clone())
            {
                entries.remove(&key_to_remove);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> CachedResponse {
        CachedResponse {
            content: content.to_string(),
            model: "gpt-4o".to_string(),
            provider: "openai".to_string(),
        }
    }

    #[test]
    fn test_key_truncates_prompt() {
        let long = "x".repeat(250);
        let key = ResponseCache::key(TaskType::Analysis, &long);
        assert_eq!(key, format!("analysis:{}", "x".repeat(100)));
    }

    #[test]
    fn test_key_counts_characters_not_bytes() {
        let prompt = "é".repeat(150);
        let key = ResponseCache::key(TaskType::Conversation, &prompt);
        assert_eq!(key.chars().count(), "conversation:".len() + 100);
    }

    #[tokio::test]
    async fn test_put_get_and_task_isolation() {
        let cache = ResponseCache::new(10);
        cache.put(TaskType::Conversation, "hello", response("hi"));

        assert_eq!(
            cache.get(TaskType::Conversation, "hello").map(|r| r.content),
            Some("hi".to_string())
        );
        assert!(cache.get(TaskType::Summarization, "hello").is_none());
    }

    #[tokio::test]
    async fn test_shared_prefix_shares_entry() {
        let cache = ResponseCache::new(10);
        let base = "p".repeat(100);
        cache.put(TaskType::Conversation, &format!("{base} one"), response("first"));
        let hit = cache.get(TaskType::Conversation, &format!("{base} two"));
        assert_eq!(hit.map(|r| r.content), Some("first".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = ResponseCache::new(10).with_ttl(Duration::from_secs(5));
        cache.put(TaskType::Conversation, "hello", response("hi"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(TaskType::Conversation, "hello").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_prefers_unused_entries() {
        let cache = ResponseCache::new(2);
        cache.put(TaskType::Conversation, "p1", response("c1"));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.put(TaskType::Conversation, "p2", response("c2"));
        assert!(cache.get(TaskType::Conversation, "p1").is_some());

        cache.put(TaskType::Conversation, "p3", response("c3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(TaskType::Conversation, "p1").is_some());
        assert!(cache.get(TaskType::Conversation, "p2").is_none());
    }

    #[tokio::test]
    async fn test_zero_size_cache_stores_nothing() {
        let cache = ResponseCache::new(0);
        cache.put(TaskType::Conversation, "p", response("c"));
        assert!(cache.is_empty());
    }
}
