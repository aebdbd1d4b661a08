//! ZeptoRelay - Rate-limited message delivery and streaming control plane for chat-bot agents
//!
//! Sits between an agent runtime and a messaging platform: ordered
//! per-conversation input streams, global and per-chat rate limiting,
//! retry with provider hints, duplicate suppression, markdown to
//! text-plus-entities conversion, and live progress for long turns.

pub mod bus;
pub mod config;
pub mod delivery;
pub mod error;
pub mod format;
pub mod platform;
pub mod progress;
pub mod relay;
pub mod store;
pub mod utils;

pub use bus::{AgentEvent, DropPolicy, InboundItem, StreamHandle, StreamRegistry};
pub use config::Config;
pub use delivery::{Deduplicator, Deliverer, RateLimiter, RetryPolicy};
pub use error::{PlatformError, RelayError, Result};
pub use format::{Entity, EntityKind, FormattedText, Formatter};
pub use platform::{MessageId, MessagingPlatform};
pub use progress::{MessageAggregator, ProgressTracker};
pub use relay::Relay;
pub use store::{JsonFileStore, MemoryStore, StateStore};
