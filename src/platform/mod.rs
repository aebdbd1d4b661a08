//! Messaging platform abstraction.
//!
//! The control plane never talks to a concrete bot API directly. Everything
//! outbound goes through the [`MessagingPlatform`] trait, whose four calls map
//! onto what rate-limited chat platforms (Telegram, Slack, ...) expose. Every
//! call may fail with a [`PlatformError`]; the delivery layer classifies those
//! into retry, pause or give-up decisions.
//!
//! # Implementing a Platform
//!
//! ```ignore
//! use async_trait::async_trait;
//! use zeptorelay::error::PlatformError;
//! use zeptorelay::format::FormattedText;
//! use zeptorelay::platform::{MessageId, MessagingPlatform, PlatformResult};
//!
//! struct MyBot { /* client */ }
//!
//! #[async_trait]
//! impl MessagingPlatform for MyBot {
//!     fn name(&self) -> &str { "mybot" }
//!
//!     async fn send_message(&self, chat_id: &str, text: &FormattedText) -> PlatformResult<MessageId> {
//!         // POST sendMessage with text.text and text.entities
//!         # unimplemented!()
//!     }
//!     // edit_message, delete_message, send_typing ...
//! }
//! ```

pub mod classify;
pub mod console;
pub mod mock;

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::format::FormattedText;

pub use classify::classify_error_message;
pub use console::ConsolePlatform;
pub use mock::{PlatformCall, PlatformOp, RecordingPlatform};

/// Platform-assigned identifier of a delivered message.
pub type MessageId = i64;

/// Result of a raw platform call.
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Outbound calls offered by a messaging platform client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// Short platform name used in logs (e.g., "telegram").
    fn name(&self) -> &str;

    /// Send a new message; returns the platform's id for it.
    async fn send_message(&self, chat_id: &str, text: &FormattedText)
        -> PlatformResult<MessageId>;

    /// Replace the content of an existing message.
    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &FormattedText,
    ) -> PlatformResult<()>;

    /// Delete a message.
    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> PlatformResult<()>;

    /// Show the "typing…" indicator for a few seconds.
    async fn send_typing(&self, chat_id: &str) -> PlatformResult<()>;
}
