//! Inbound Bus Module
//!
//! This module provides the inbound half of the control plane: the bounded
//! per-conversation queues and the registry that owns one ordered stream per
//! conversation, drained by the agent's own processing loop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  add_message   ┌──────────────────┐   next()   ┌─────────────┐
//! │  Platform / │ ─────────────> │  StreamRegistry  │ ─────────> │    Agent    │
//! │    Tools    │                │ chat → Bounded-  │            │    loop     │
//! └─────────────┘                │ Queue + Cancel   │            └─────────────┘
//!                                └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use zeptorelay::bus::{DropPolicy, InboundItem, StreamRegistry};
//!
//! # tokio_test::block_on(async {
//! let registry = StreamRegistry::new(100, DropPolicy::Oldest);
//! let stream = registry.get_or_create("chat456");
//!
//! registry.add_message("chat456", InboundItem::user("chat456", "user123", "Hello"));
//!
//! let item = stream.next().await.unwrap();
//! assert_eq!(item.text(), Some("Hello"));
//! # })
//! ```

pub mod message;
pub mod queue;
pub mod registry;

pub use message::{AgentEvent, InboundItem, InboundKind};
pub use queue::{BoundedQueue, DropPolicy, QueueStats};
pub use registry::{StreamHandle, StreamRegistry};
