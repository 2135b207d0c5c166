//! Message delivery
//!
//! Rate limiting, retries with backoff, the offline queue and cache, and the
//! per-session [`MessageManager`] that drives them.

pub mod cache;
pub mod manager;
pub mod queue;
pub mod rate_limit;
pub mod retry;

pub use cache::MessageCache;
pub use manager::{FlushReport, MessageManager, SendOutcome};
pub use queue::MessageQueue;
pub use rate_limit::{RateLimiter, RATE_LIMIT_WINDOW};
pub use retry::{RetryConfig, RetryController};
