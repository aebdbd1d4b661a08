//! Console platform used by the `simulate` command.
//!
//! Prints every outbound call to stdout instead of hitting a real bot API.
//! Optionally injects flood-control errors so the pause/backoff paths can be
//! watched end to end.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{classify_error_message, MessageId, MessagingPlatform, PlatformResult};
use crate::format::FormattedText;

/// Stdout-backed platform.
pub struct ConsolePlatform {
    next_id: AtomicI64,
    edits: AtomicU64,
    throttle_every: Option<u64>,
    throttle_for: Duration,
}

impl Default for ConsolePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsolePlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            edits: AtomicU64::new(0),
            throttle_every: None,
            throttle_for: Duration::from_secs(1),
        }
    }

    /// Fail every `n`th edit with a flood-control error carrying `retry_after`.
    pub fn with_throttle_every(mut self, n: u64, retry_after: Duration) -> Self {
        self.throttle_every = Some(n.max(1));
        self.throttle_for = retry_after;
        self
    }

    fn describe(text: &FormattedText) -> String {
        if text.entities.is_empty() {
            text.text.clone()
        } else {
            format!("{}  [{} entities]", text.text, text.entities.len())
        }
    }
}

#[async_trait]
impl MessagingPlatform for ConsolePlatform {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &FormattedText,
    ) -> PlatformResult<MessageId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        println!("→ send   chat={} id={}\n{}\n", chat_id, id, Self::describe(text));
        Ok(id)
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &FormattedText,
    ) -> PlatformResult<()> {
        let n = self.edits.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(every) = self.throttle_every {
            if n % every == 0 {
                println!(
                    "✗ edit   chat={} id={} throttled ({}s)",
                    chat_id,
                    message_id,
                    self.throttle_for.as_secs()
                );
                return Err(classify_error_message(&format!(
                    "Too Many Requests: retry after {}",
                    self.throttle_for.as_secs()
                )));
            }
        }
        println!(
            "✎ edit   chat={} id={}\n{}\n",
            chat_id,
            message_id,
            Self::describe(text)
        );
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> PlatformResult<()> {
        println!("✗ delete chat={} id={}", chat_id, message_id);
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> PlatformResult<()> {
        println!("… typing chat={}", chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_throttle_carries_hint() {
        let platform = ConsolePlatform::new().with_throttle_every(2, Duration::from_secs(3));
        let id = platform
            .send_message("c", &FormattedText::plain("hi"))
            .await
            .unwrap();

        let text = FormattedText::plain("edit");
        assert!(platform.edit_message("c", id, &text).await.is_ok());
        let err = platform.edit_message("c", id, &text).await.unwrap_err();
        assert!(err.is_throttle());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert!(platform.edit_message("c", id, &text).await.is_ok());
    }
}
