//! Outbound pipeline: dedup → format → rate limit → retry → platform.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use super::dedup::Deduplicator;
use super::rate_limit::RateLimiter;
use super::retry::{with_retry, RetryPolicy};
use crate::config::Config;
use crate::error::{PlatformError, RelayError, Result};
use crate::format::{FormattedText, Formatter};
use crate::platform::{MessageId, MessagingPlatform, PlatformResult};
use crate::utils::metrics::{Counter, DeliveryMetrics};

/// Sends, edits and deletes messages under the platform's limits.
///
/// Every call takes a global and a per-chat token first, then runs the
/// network call inside the retry loop. Throttling and transient failures are
/// retried here; what comes back out is either success or a classified
/// [`RelayError`].
pub struct Deliverer {
    platform: Arc<dyn MessagingPlatform>,
    limiter: Arc<RateLimiter>,
    dedup: Arc<Deduplicator>,
    formatter: Formatter,
    retry: RetryPolicy,
    metrics: Arc<DeliveryMetrics>,
    max_message_length: usize,
}

impl Deliverer {
    pub fn new(
        config: &Config,
        platform: Arc<dyn MessagingPlatform>,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        Self {
            platform,
            limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            dedup: Arc::new(Deduplicator::from_config(&config.dedup)),
            formatter: Formatter::new(&config.format),
            retry: RetryPolicy::from(&config.retry),
            metrics,
            max_message_length: config.format.max_message_length,
        }
    }

    pub fn platform(&self) -> &Arc<dyn MessagingPlatform> {
        &self.platform
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.dedup
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    /// Convert markdown with this deliverer's formatter settings.
    pub fn format(&self, markdown: &str) -> FormattedText {
        self.formatter.convert(markdown)
    }

    /// Send markdown as one or more messages.
    ///
    /// Returns `Ok(None)` when the same content went to this chat within the
    /// dedup window, or when it renders to nothing. Otherwise returns the id
    /// of the first message.
    pub async fn send_markdown(&self, chat_id: &str, markdown: &str) -> Result<Option<MessageId>> {
        if self.dedup.check_and_mark(chat_id, markdown) {
            self.metrics.incr(Counter::DuplicatesSuppressed);
            return Ok(None);
        }
        let formatted = self.format(markdown);
        if formatted.is_empty() {
            debug!(chat_id = %chat_id, "Markdown rendered to empty text; nothing sent");
            return Ok(None);
        }
        self.send_formatted(chat_id, &formatted).await.map(Some)
    }

    /// Send pre-formatted text, splitting it into platform-sized messages.
    pub async fn send_formatted(&self, chat_id: &str, text: &FormattedText) -> Result<MessageId> {
        if text.is_empty() {
            return Err(RelayError::PermanentSend(PlatformError::BadRequest(
                "message text is empty".to_string(),
            )));
        }

        let chunks = text.chunk(self.max_message_length);
        let total = chunks.len();
        let mut first_id = None;

        for (i, chunk) in chunks.iter().enumerate() {
            let platform = &self.platform;
            let id = self
                .call(chat_id, &self.retry, || platform.send_message(chat_id, chunk))
                .await?;
            self.metrics.incr(Counter::MessagesSent);
            debug!(
                chat_id = %chat_id,
                message_id = id,
                chunk = i + 1,
                total,
                "Message sent"
            );
            first_id.get_or_insert(id);
        }

        first_id.ok_or_else(|| {
            RelayError::PermanentSend(PlatformError::BadRequest(
                "message text is empty".to_string(),
            ))
        })
    }

    /// Replace a message's content with rendered markdown.
    pub async fn edit_markdown(
        &self,
        chat_id: &str,
        message_id: MessageId,
        markdown: &str,
    ) -> Result<()> {
        let formatted = self.format(markdown);
        self.edit_formatted(chat_id, message_id, &formatted).await
    }

    /// Edit with retries. Content longer than one message is truncated.
    /// An unchanged-content rejection counts as success.
    pub async fn edit_formatted(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &FormattedText,
    ) -> Result<()> {
        let policy = self.retry.clone();
        self.edit_with(chat_id, message_id, text, &policy).await
    }

    /// Single-attempt edit for callers that handle throttling themselves.
    pub async fn try_edit(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &FormattedText,
    ) -> Result<()> {
        self.edit_with(chat_id, message_id, text, &RetryPolicy::none())
            .await
    }

    /// Single-attempt send for callers that handle throttling themselves.
    pub async fn try_send(&self, chat_id: &str, text: &FormattedText) -> Result<MessageId> {
        let text = text.truncate(self.max_message_length);
        let platform = &self.platform;
        let id = self
            .call(chat_id, &RetryPolicy::none(), || {
                platform.send_message(chat_id, &text)
            })
            .await?;
        self.metrics.incr(Counter::MessagesSent);
        Ok(id)
    }

    async fn edit_with(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &FormattedText,
        policy: &RetryPolicy,
    ) -> Result<()> {
        let text = text.truncate(self.max_message_length);
        let platform = &self.platform;
        let text_ref = &text;
        self.call(chat_id, policy, || async move {
            match platform.edit_message(chat_id, message_id, text_ref).await {
                Err(e) if e.is_not_modified() => {
                    debug!(chat_id = %chat_id, message_id, "Edit skipped: content unchanged");
                    Ok(())
                }
                other => other,
            }
        })
        .await?;
        self.metrics.incr(Counter::MessagesEdited);
        Ok(())
    }

    pub async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> Result<()> {
        let platform = &self.platform;
        self.call(chat_id, &self.retry, || {
            platform.delete_message(chat_id, message_id)
        })
        .await?;
        self.metrics.incr(Counter::MessagesDeleted);
        Ok(())
    }

    /// Show the typing indicator. One attempt; callers usually ignore errors.
    pub async fn send_typing(&self, chat_id: &str) -> Result<()> {
        let platform = &self.platform;
        self.call(chat_id, &RetryPolicy::none(), || platform.send_typing(chat_id))
            .await?;
        self.metrics.incr(Counter::TypingSent);
        Ok(())
    }

    /// Throttle, retry and classify one platform operation.
    async fn call<T, F, Fut>(&self, chat_id: &str, policy: &RetryPolicy, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PlatformResult<T>>,
    {
        let outcome = self
            .limiter
            .throttle(chat_id, || with_retry(policy, op))
            .await;

        if outcome.attempts > 1 {
            self.metrics
                .add(Counter::Retries, u64::from(outcome.attempts - 1));
        }

        outcome.result.map_err(|err| {
            let counter = if err.is_throttle() {
                Counter::Throttled
            } else if err.is_permanent() || matches!(err, PlatformError::BadRequest(_)) {
                Counter::PermanentFailures
            } else {
                Counter::TransientFailures
            };
            self.metrics.incr(counter);
            warn!(
                chat_id = %chat_id,
                attempts = outcome.attempts,
                error = %err,
                "Platform call failed"
            );
            RelayError::from(err)
        })
    }
}
