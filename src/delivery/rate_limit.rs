//! Fixed-window message rate limiter
//!
//! The counter is zeroed every window (60 s by default) regardless of when
//! the messages arrived, so a burst straddling a window boundary can reach
//! twice the limit. The limiter never waits; callers reject instead.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Default window length
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    count: AtomicU32,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            count: AtomicU32::new(0),
        }
    }

    /// True iff another message fits in the current window; does not count it
    pub fn check_rate_limit(&self) -> bool {
        self.count.load(Ordering::SeqCst) < self.limit
    }

    /// Count one accepted message
    pub fn increment_message_count(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn message_count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.message_count())
    }

    /// Zero the counter every `window` until the limiter is dropped
    ///
    /// A zero window falls back to [`RATE_LIMIT_WINDOW`].
    pub fn spawn_reset_timer(self: &Arc<Self>, window: Duration) -> JoinHandle<()> {
        let window = if window.is_zero() {
            tracing::warn!(
                default_secs = RATE_LIMIT_WINDOW.as_secs(),
                "Zero rate window, using the default"
            );
            RATE_LIMIT_WINDOW
        } else {
            window
        };
        let limiter = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + window, window);
            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        tracing::trace!(count = limiter.message_count(), "Rate window reset");
                        limiter.reset();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_is_count_below_limit() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.check_rate_limit());
            limiter.increment_message_count();
        }
        assert!(!limiter.check_rate_limit());
        // checking does not mutate
        assert!(!limiter.check_rate_limit());
        assert_eq!(limiter.message_count(), 3);
        assert_eq!(limiter.remaining(), 0);

        limiter.reset();
        assert!(limiter.check_rate_limit());
        assert_eq!(limiter.remaining(), 3);
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let limiter = RateLimiter::new(0);
        assert!(!limiter.check_rate_limit());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_timer_zeroes_each_window() {
        let limiter = Arc::new(RateLimiter::new(2));
        let handle = limiter.spawn_reset_timer(RATE_LIMIT_WINDOW);

        limiter.increment_message_count();
        limiter.increment_message_count();
        assert!(!limiter.check_rate_limit());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(limiter.check_rate_limit());
        assert_eq!(limiter.message_count(), 0);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_burst_reaches_twice_the_limit() {
        let limiter = Arc::new(RateLimiter::new(2));
        let handle = limiter.spawn_reset_timer(RATE_LIMIT_WINDOW);
        let mut accepted = 0;

        tokio::time::sleep(Duration::from_secs(59)).await;
        while limiter.check_rate_limit() {
            limiter.increment_message_count();
            accepted += 1;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        while limiter.check_rate_limit() {
            limiter.increment_message_count();
            accepted += 1;
        }

        // four messages inside roughly two seconds
        assert_eq!(accepted, 4);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_window_uses_default_window() {
        let limiter = Arc::new(RateLimiter::new(1));
        let handle = limiter.spawn_reset_timer(Duration::ZERO);

        limiter.increment_message_count();
        assert!(!limiter.check_rate_limit());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!handle.is_finished());
        assert!(!limiter.check_rate_limit());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(limiter.check_rate_limit());
        assert!(!handle.is_finished());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_timer_stops_when_limiter_dropped() {
        let limiter = Arc::new(RateLimiter::new(1));
        let handle = limiter.spawn_reset_timer(Duration::from_secs(1));
        drop(limiter);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
