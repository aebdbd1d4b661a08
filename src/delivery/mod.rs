//! Outbound delivery under platform rate limits.
//!
//! - [`rate_limit`]: global and per-chat token buckets
//! - [`retry`]: exponential backoff that defers to provider retry hints
//! - [`dedup`]: short-window duplicate suppression
//! - [`deliverer`]: the pipeline tying them to a [`crate::platform::MessagingPlatform`]

pub mod dedup;
pub mod deliverer;
pub mod rate_limit;
pub mod retry;

pub use dedup::Deduplicator;
pub use deliverer::Deliverer;
pub use rate_limit::{RateLimiter, TokenBucket};
pub use retry::{parse_retry_after, with_retry, with_retry_if, RetryHint, RetryOutcome, RetryPolicy};
