//! Retry policy and cancellable retry timers
//!
//! The policy is exponential backoff capped at `max_delay_ms`. Each scheduled
//! re-attempt runs as an [`Abortable`] tokio task whose [`AbortHandle`] is kept
//! per message id, so a retry can be cancelled (or superseded) before it fires.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{AbortHandle, Abortable};
use serde::{Deserialize, Serialize};

use crate::core::Message;

/// Backoff policy, also the `[retry]` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// `min(initial_delay * backoff_factor^attempts, max_delay)`
    pub fn calculate_retry_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// True while the message still has retry budget
    pub fn should_retry(&self, message: &Message) -> bool {
        message.retry_count < self.max_retries
    }
}

/// Owns the pending retry timers of one session
pub struct RetryController {
    config: Arc<RetryConfig>,
    handles: Arc<DashMap<String, (u64, AbortHandle)>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: Arc::new(config),
            handles: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Policy snapshot; never changes for the controller's lifetime
    pub fn config(&self) -> &Arc<RetryConfig> {
        &self.config
    }

    pub fn calculate_retry_delay(&self, attempts: u32) -> Duration {
        self.config.calculate_retry_delay(attempts)
    }

    pub fn should_retry(&self, message: &Message) -> bool {
        self.config.should_retry(message)
    }

    /// Run `task` after `delay` unless cancelled first
    ///
    /// Scheduling an id that already has a pending timer aborts the old one.
    /// The entry is released just before `task` starts, so the task may
    /// schedule a follow-up retry for the same id.
    pub fn schedule<F>(&self, message_id: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (abort_handle, registration) = AbortHandle::new_pair();

        if let Some((_, previous)) = self
            .handles
            .insert(message_id.to_string(), (generation, abort_handle))
        {
            tracing::debug!(message_id, "Superseding pending retry");
            previous.abort();
        }

        let handles = Arc::clone(&self.handles);
        let id = message_id.to_string();
        let delayed = async move {
            tokio::time::sleep(delay).await;
            handles.remove_if(&id, |_, (entry_generation, _)| *entry_generation == generation);
            task.await;
        };

        tokio::spawn(Abortable::new(delayed, registration));
    }

    /// Cancel the pending retry for one message
    pub fn cancel(&self, message_id: &str) -> bool {
        match self.handles.remove(message_id) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending retry, returning how many were aborted
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    pub fn is_scheduled(&self, message_id: &str) -> bool {
        self.handles.contains_key(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for RetryController {
    fn drop(&mut self) {
        for entry in self.handles.iter() {
            entry.value().1.abort();
        }
    }
}
