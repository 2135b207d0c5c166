//! Provider cooldowns after rate-limit responses
//!
//! A provider that answered 429 is skipped by the router until its window
//! passes. Shared between concurrent completions, so it takes `&self`.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct ProviderCooldowns {
    until: DashMap<String, Instant>,
}

impl ProviderCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip `provider` for `duration` from now
    pub fn cool_down(&self, provider: &str, duration: Duration) {
        let expires_at = Instant::now() + duration;
        tracing::info!(provider, secs = duration.as_secs(), "provider cooling down");
        self.until.insert(provider.to_string(), expires_at);
    }

    pub fn is_cooling_down(&self, provider: &str) -> bool {
        self.remaining(provider).is_some()
    }

    /// Time left on the window, `None` once it has passed
    pub fn remaining(&self, provider: &str) -> Option<Duration> {
        let expires_at = *self.until.get(provider)?;
        let now = Instant::now();
        (now < expires_at).then(|| expires_at - now)
    }

    pub fn clear(&self, provider: &str) {
        self.until.remove(provider);
    }

    /// Drop expired windows
    pub fn prune(&self) {
        let now = Instant::now();
        self.until.retain(|_, expires_at| now < *expires_at);
    }

    /// Providers currently cooling down
    pub fn active(&self) -> Vec<String> {
        let now = Instant::now();
        let mut names: Vec<String> = self
            .until
            .iter()
            .filter(|entry| now < *entry.value())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}
