//! Message types for the ZeptoRelay conversation streams
//!
//! [`InboundItem`] flows from the platform (user messages) and from tools
//! (asynchronous results) into the per-conversation stream consumed by the
//! agent. [`AgentEvent`] flows the other way: typed output of an agent turn,
//! routed to the aggregator, the progress tracker and the deliverer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::platform::MessageId;

/// One item of a conversation's ordered input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundItem {
    /// Conversation the item belongs to
    pub chat_id: String,
    /// Who produced it ("system" for tool/system items)
    pub sender_id: String,
    /// Payload
    pub kind: InboundKind,
    /// Additional metadata key-value pairs (platform message id, reply target, ...)
    pub metadata: HashMap<String, String>,
}

/// Payload variants accepted by the agent's input stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundKind {
    /// Text typed by the user
    UserText { text: String },
    /// Result of a tool that completed outside the agent's own loop
    ToolResult {
        tool_id: String,
        content: String,
        is_error: bool,
    },
    /// Control or system notice
    System { text: String },
}

impl InboundItem {
    /// Creates a user text item.
    ///
    /// # Example
    /// ```
    /// use zeptorelay::bus::{InboundItem, InboundKind};
    ///
    /// let item = InboundItem::user("chat456", "user123", "Hello, bot!");
    /// assert_eq!(item.text(), Some("Hello, bot!"));
    /// assert!(matches!(item.kind, InboundKind::UserText { .. }));
    /// ```
    pub fn user(chat_id: &str, sender_id: &str, text: &str) -> Self {
        Self::with_kind(
            chat_id,
            sender_id,
            InboundKind::UserText {
                text: text.to_string(),
            },
        )
    }

    /// Creates a tool result item.
    pub fn tool_result(chat_id: &str, tool_id: &str, content: &str, is_error: bool) -> Self {
        Self::with_kind(
            chat_id,
            "system",
            InboundKind::ToolResult {
                tool_id: tool_id.to_string(),
                content: content.to_string(),
                is_error,
            },
        )
    }

    /// Creates a system notice item.
    pub fn system(chat_id: &str, text: &str) -> Self {
        Self::with_kind(
            chat_id,
            "system",
            InboundKind::System {
                text: text.to_string(),
            },
        )
    }

    fn with_kind(chat_id: &str, sender_id: &str, kind: InboundKind) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            kind,
            metadata: HashMap::new(),
        }
    }

    /// Adds a metadata key-value pair (builder pattern).
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Textual payload, if the item carries one.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            InboundKind::UserText { text } | InboundKind::System { text } => Some(text),
            InboundKind::ToolResult { content, .. } => Some(content),
        }
    }
}

/// Typed output of an agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A new turn began; `anchor_message_id` is the message to aggregate steps into, if any
    TurnStarted { anchor_message_id: Option<MessageId> },
    /// Assistant text to deliver to the user (markdown)
    Text { text: String },
    /// The agent invoked a tool
    ToolUse {
        tool_id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A tool invocation finished
    ToolResult {
        tool_id: String,
        content: String,
        is_error: bool,
    },
    /// Control/system notice from the runtime
    System { text: String },
    /// The turn finished
    TurnCompleted { success: bool },
    /// The turn was cancelled
    Aborted,
}
