//! In-memory platform that records every call.
//!
//! Used by tests and the `simulate` command's assertions. Failures can be
//! scripted per operation with [`RecordingPlatform::fail_next`]; each scripted
//! failure is consumed by exactly one matching call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MessageId, MessagingPlatform, PlatformResult};
use crate::error::PlatformError;
use crate::format::FormattedText;

/// Which platform operation a call or scripted failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformOp {
    Send,
    Edit,
    Delete,
    Typing,
}

/// A recorded platform call.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Send {
        chat_id: String,
        message_id: MessageId,
        text: FormattedText,
    },
    Edit {
        chat_id: String,
        message_id: MessageId,
        text: FormattedText,
    },
    Delete {
        chat_id: String,
        message_id: MessageId,
    },
    Typing {
        chat_id: String,
    },
}

impl PlatformCall {
    pub fn op(&self) -> PlatformOp {
        match self {
            PlatformCall::Send { .. } => PlatformOp::Send,
            PlatformCall::Edit { .. } => PlatformOp::Edit,
            PlatformCall::Delete { .. } => PlatformOp::Delete,
            PlatformCall::Typing { .. } => PlatformOp::Typing,
        }
    }
}

/// Recording platform with scriptable failures.
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    failures: Mutex<VecDeque<(PlatformOp, PlatformError)>>,
    attempts: Mutex<Vec<PlatformOp>>,
    next_id: AtomicI64,
}

impl Default for RecordingPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Make the next call of kind `op` fail with `err`.
    pub fn fail_next(&self, op: PlatformOp, err: PlatformError) {
        self.failures.lock().unwrap().push_back((op, err));
    }

    /// Successful calls, in order.
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Every attempt including failed ones.
    pub fn attempts(&self, op: PlatformOp) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|o| **o == op)
            .count()
    }

    pub fn count(&self, op: PlatformOp) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.op() == op)
            .count()
    }

    /// Plain text of every successful send, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                PlatformCall::Send { text, .. } => Some(text.text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Plain text of every successful edit, in order.
    pub fn edited_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                PlatformCall::Edit { text, .. } => Some(text.text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Most recent edit text for a message.
    pub fn last_edit(&self, message_id: MessageId) -> Option<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|c| match c {
                PlatformCall::Edit {
                    message_id: id,
                    text,
                    ..
                } if *id == message_id => Some(text.text.clone()),
                _ => None,
            })
    }

    fn begin(&self, op: PlatformOp) -> PlatformResult<()> {
        self.attempts.lock().unwrap().push(op);
        let mut failures = self.failures.lock().unwrap();
        if let Some(pos) = failures.iter().position(|(o, _)| *o == op) {
            if let Some((_, err)) = failures.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MessagingPlatform for RecordingPlatform {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_message(
        &self,
        chat_id: &str,
        text: &FormattedText,
    ) -> PlatformResult<MessageId> {
        self.begin(PlatformOp::Send)?;
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.record(PlatformCall::Send {
            chat_id: chat_id.to_string(),
            message_id,
            text: text.clone(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: &str,
        message_id: MessageId,
        text: &FormattedText,
    ) -> PlatformResult<()> {
        self.begin(PlatformOp::Edit)?;
        self.record(PlatformCall::Edit {
            chat_id: chat_id.to_string(),
            message_id,
            text: text.clone(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: MessageId) -> PlatformResult<()> {
        self.begin(PlatformOp::Delete)?;
        self.record(PlatformCall::Delete {
            chat_id: chat_id.to_string(),
            message_id,
        });
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> PlatformResult<()> {
        self.begin(PlatformOp::Typing)?;
        self.record(PlatformCall::Typing {
            chat_id: chat_id.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_calls_and_assigns_ids() {
        let platform = RecordingPlatform::new();
        let text = FormattedText::plain("hi");
        let first = platform.send_message("c", &text).await.unwrap();
        let second = platform.send_message("c", &text).await.unwrap();
        assert_eq!(second, first + 1);
        platform.edit_message("c", first, &text).await.unwrap();
        platform.send_typing("c").await.unwrap();

        assert_eq!(platform.count(PlatformOp::Send), 2);
        assert_eq!(platform.last_edit(first).as_deref(), Some("hi"));
        assert_eq!(platform.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_scripted_failure_consumed_once() {
        let platform = RecordingPlatform::new();
        platform.fail_next(PlatformOp::Edit, PlatformError::Server("502".into()));
        let text = FormattedText::plain("x");

        // A send is unaffected by an edit failure.
        assert!(platform.send_message("c", &text).await.is_ok());
        assert!(platform.edit_message("c", 1, &text).await.is_err());
        assert!(platform.edit_message("c", 1, &text).await.is_ok());
        assert_eq!(platform.attempts(PlatformOp::Edit), 2);
        assert_eq!(platform.count(PlatformOp::Edit), 1);
    }
}
