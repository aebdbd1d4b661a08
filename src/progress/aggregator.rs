//! Message aggregator: many tool steps, one evolving status message.
//!
//! Each agent turn gets an [`AggregationSession`] bound to an anchor message.
//! Steps are appended and completed as tool events arrive; re-renders are
//! debounced so the anchor is edited at most once per `min_update_interval`.
//!
//! Debounce is a small state machine per session:
//!
//! ```text
//! idle ──change──▶ scheduled ──timer──▶ fired ──edit done──▶ idle
//!                    │  ▲                  │
//!                    └──┘ change: dirty    └─ dirty again: scheduled
//! ```
//!
//! A session owns at most one timer task. Changes while a timer is pending (or
//! while its edit is in flight) only set the dirty flag and ride that timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::tools::{ToolCategory, ToolInput, ToolTier};
use crate::config::AggregatorConfig;
use crate::delivery::Deliverer;
use crate::error::RelayError;
use crate::format::{EntityKind, FormattedText};
use crate::platform::MessageId;
use crate::utils::string::{format_duration, preview};

/// Chars of a tool result kept for failed steps.
const ERROR_DETAIL_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl StepStatus {
    fn icon(&self) -> &'static str {
        match self {
            StepStatus::Pending => "⏸",
            StepStatus::Running => "🔄",
            StepStatus::Completed => "✅",
            StepStatus::Error => "❌",
        }
    }
}

/// One tool execution within a turn.
#[derive(Debug, Clone)]
pub struct Step {
    pub tool_name: String,
    pub tool_id: String,
    pub status: StepStatus,
    pub input: ToolInput,
    pub summary: String,
    pub details: Option<String>,
    pub started: Instant,
    pub duration: Option<Duration>,
}

impl Step {
    fn category(&self) -> ToolCategory {
        self.input.spec().category
    }

    fn tier(&self) -> ToolTier {
        self.input.spec().tier
    }

    fn line(&self) -> String {
        let mut line = format!("{} {}", self.status.icon(), self.input);
        if let Some(d) = self.duration {
            line.push_str(&format!(" ({})", format_duration(d)));
        }
        line
    }
}

/// State of one aggregated turn.
#[derive(Debug)]
pub struct AggregationSession {
    pub chat_id: String,
    pub anchor_message_id: MessageId,
    pub steps: Vec<Step>,
    pub total_steps_hint: Option<usize>,
    pub started: Instant,
    pub last_edit: Instant,
    generation: u64,
    dirty: bool,
    timer: Option<JoinHandle<()>>,
    anchor_dead: bool,
    last_rendered: Option<FormattedText>,
}

impl AggregationSession {
    fn new(chat_id: &str, anchor_message_id: MessageId, generation: u64) -> Self {
        let now = Instant::now();
        Self {
            chat_id: chat_id.to_string(),
            anchor_message_id,
            steps: Vec::new(),
            total_steps_hint: None,
            started: now,
            last_edit: now,
            generation,
            dirty: false,
            timer: None,
            anchor_dead: false,
            last_rendered: None,
        }
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn counts_by_category(&self) -> Vec<(ToolCategory, usize)> {
        let mut counts: Vec<(ToolCategory, usize)> = Vec::new();
        for step in &self.steps {
            let category = step.category();
            match counts.iter_mut().find(|(c, _)| *c == category) {
                Some((_, n)) => *n += 1,
                None => counts.push((category, 1)),
            }
        }
        counts.sort_by_key(|(c, _)| *c);
        counts
    }

    /// Live status: running header, high-tier steps listed, medium-tier steps
    /// collapsed past the threshold, low-tier steps only counted.
    pub fn render_live(&self, config: &AggregatorConfig) -> FormattedText {
        let mut out = FormattedText::default();
        let elapsed = format_duration(self.started.elapsed());
        let progress = match self.total_steps_hint {
            Some(total) => format!("{}/{}", self.steps.len(), total),
            None => self.steps.len().to_string(),
        };
        out.push_entity(
            EntityKind::Bold,
            &format!("⏳ Working… {} steps · {}", progress, elapsed),
        );

        let medium: Vec<&Step> = self
            .steps
            .iter()
            .filter(|s| s.tier() == ToolTier::Medium)
            .collect();
        let collapse_medium = medium.len() > config.collapse_threshold;

        let listed: Vec<&Step> = self
            .steps
            .iter()
            .filter(|s| match s.tier() {
                ToolTier::High => true,
                ToolTier::Medium => !collapse_medium,
                ToolTier::Low => false,
            })
            .collect();
        let skip = listed.len().saturating_sub(config.live_recent_steps.max(1));
        if skip > 0 {
            out.push(&format!("\n… {} earlier", skip));
        }
        for step in listed.iter().skip(skip) {
            out.push("\n").push(&step.line());
        }

        if collapse_medium {
            let mut by_category: Vec<(ToolCategory, usize, &'static str)> = Vec::new();
            for step in &medium {
                let category = step.category();
                match by_category.iter_mut().find(|(c, _, _)| *c == category) {
                    Some((_, n, _)) => *n += 1,
                    None => by_category.push((category, 1, step.input.spec().icon)),
                }
            }
            let collapsed: Vec<String> = by_category
                .iter()
                .map(|(c, n, icon)| format!("{} {}", icon, c.label(*n)))
                .collect();
            out.push("\n").push(&collapsed.join(" · "));
        }

        if collapse_medium {
            if let Some(running) = medium.iter().rev().find(|s| s.status == StepStatus::Running) {
                out.push("\n").push(&running.line());
            }
        }

        out
    }

    /// Final summary: status line, categorized counts, expandable step list
    /// capped at `max_visible_steps` with a "+N more" trailer.
    pub fn render_final(&self, config: &AggregatorConfig) -> FormattedText {
        let mut out = FormattedText::default();
        let errors = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Error)
            .count();
        let elapsed = format_duration(self.started.elapsed());
        let status = if errors == 0 {
            format!("✅ Done · {} steps · {}", self.steps.len(), elapsed)
        } else {
            format!(
                "⚠️ Done with {} error{} · {} steps · {}",
                errors,
                if errors == 1 { "" } else { "s" },
                self.steps.len(),
                elapsed
            )
        };
        out.push_entity(EntityKind::Bold, &status);

        let counts = self.counts_by_category();
        if !counts.is_empty() {
            let parts: Vec<String> = counts.iter().map(|(c, n)| c.label(*n)).collect();
            out.push("\n").push(&parts.join(" · "));
        }

        if self.steps.is_empty() {
            return out;
        }

        let max_visible = config.max_visible_steps;
        out.push("\n");
        out.wrap(EntityKind::ExpandableBlockquote, |out| {
            let mut lines: Vec<String> = Vec::new();
            for step in self.steps.iter().take(max_visible) {
                let mut line = step.line();
                if let Some(details) = &step.details {
                    line.push_str(&format!(": {}", details));
                }
                lines.push(line);
            }
            if self.steps.len() > max_visible {
                lines.push(format!("+{} more", self.steps.len() - max_visible));
            }
            out.push(&lines.join("\n"));
        });

        out
    }
}

struct Inner {
    sessions: Mutex<HashMap<String, AggregationSession>>,
    deliverer: Arc<Deliverer>,
    config: AggregatorConfig,
    generation: AtomicU64,
}

/// Per-chat step aggregation with debounced anchor edits.
#[derive(Clone)]
pub struct MessageAggregator {
    inner: Arc<Inner>,
}

impl MessageAggregator {
    pub fn new(config: AggregatorConfig, deliverer: Arc<Deliverer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                deliverer,
                config,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Begin aggregating into `anchor_message_id`, replacing any session
    /// already open for this chat.
    pub fn start_session(&self, chat_id: &str, anchor_message_id: MessageId) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut sessions = self.inner.sessions.lock().unwrap();
        if let Some(old) = sessions.insert(
            chat_id.to_string(),
            AggregationSession::new(chat_id, anchor_message_id, generation),
        ) {
            if let Some(timer) = old.timer {
                timer.abort();
            }
            debug!(chat_id = %chat_id, "Replaced open aggregation session");
        }
        debug!(chat_id = %chat_id, anchor = anchor_message_id, "Aggregation session started");
    }

    /// Append a running step. Returns `false` when no session is open.
    pub fn add_step(&self, chat_id: &str, tool_name: &str, tool_id: &str, input: &Value) -> bool {
        let input = ToolInput::from_json(tool_name, input);
        {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(chat_id) else {
                return false;
            };
            session.steps.push(Step {
                tool_name: tool_name.to_string(),
                tool_id: tool_id.to_string(),
                status: StepStatus::Running,
                summary: input.summary(),
                input,
                details: None,
                started: Instant::now(),
                duration: None,
            });
        }
        self.schedule(chat_id);
        true
    }

    /// Mark a step finished. Unknown chats or tool ids are a no-op (`false`).
    pub fn complete_step(&self, chat_id: &str, tool_id: &str, result: &str, is_error: bool) -> bool {
        {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let Some(step) = sessions
                .get_mut(chat_id)
                .and_then(|s| s.steps.iter_mut().rev().find(|st| st.tool_id == tool_id))
            else {
                debug!(chat_id = %chat_id, tool_id = %tool_id, "Completion for unknown step ignored");
                return false;
            };
            step.status = if is_error {
                StepStatus::Error
            } else {
                StepStatus::Completed
            };
            step.duration = Some(step.started.elapsed());
            if is_error {
                let first_line = result.lines().next().unwrap_or("").trim();
                if !first_line.is_empty() {
                    step.details = Some(preview(first_line, ERROR_DETAIL_CHARS));
                }
            }
        }
        self.schedule(chat_id);
        true
    }

    /// Record the expected number of steps, shown as "n/total".
    pub fn set_total_steps_hint(&self, chat_id: &str, total: usize) {
        if let Some(session) = self.inner.sessions.lock().unwrap().get_mut(chat_id) {
            session.total_steps_hint = Some(total);
        }
    }

    /// Close the session: cancel any pending render, edit the anchor with the
    /// final summary and return it. `None` when no session was open.
    pub async fn end_session(&self, chat_id: &str) -> Option<FormattedText> {
        let (summary, anchor, anchor_dead) = {
            let mut sessions = self.inner.sessions.lock().unwrap();
            let mut session = sessions.remove(chat_id)?;
            if let Some(timer) = session.timer.take() {
                timer.abort();
            }
            (
                session.render_final(&self.inner.config),
                session.anchor_message_id,
                session.anchor_dead,
            )
        };

        if !anchor_dead {
            if let Err(e) = self
                .inner
                .deliverer
                .edit_formatted(chat_id, anchor, &summary)
                .await
            {
                warn!(chat_id = %chat_id, anchor, error = %e, "Final summary edit failed");
            }
        }
        Some(summary)
    }

    /// Discard the session without rendering. Returns whether one existed.
    pub fn abort_session(&self, chat_id: &str) -> bool {
        let removed = self.inner.sessions.lock().unwrap().remove(chat_id);
        match removed {
            Some(mut session) => {
                if let Some(timer) = session.timer.take() {
                    timer.abort();
                }
                debug!(chat_id = %chat_id, "Aggregation session aborted");
                true
            }
            None => false,
        }
    }

    pub fn has_session(&self, chat_id: &str) -> bool {
        self.inner.sessions.lock().unwrap().contains_key(chat_id)
    }

    pub fn step_count(&self, chat_id: &str) -> Option<usize> {
        self.inner
            .sessions
            .lock()
            .unwrap()
            .get(chat_id)
            .map(AggregationSession::step_count)
    }

    /// Chats with an open session and their live anchor ids.
    pub fn anchors(&self) -> Vec<(String, MessageId)> {
        self.inner
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| !s.anchor_dead)
            .map(|(chat, s)| (chat.clone(), s.anchor_message_id))
            .collect()
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    /// Current live render, if a session is open.
    pub fn render(&self, chat_id: &str) -> Option<FormattedText> {
        self.inner
            .sessions
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|s| s.render_live(&self.inner.config))
    }

    /// Abort every session.
    pub fn shutdown(&self) -> usize {
        let mut sessions = self.inner.sessions.lock().unwrap();
        let n = sessions.len();
        for (_, mut session) in sessions.drain() {
            if let Some(timer) = session.timer.take() {
                timer.abort();
            }
        }
        n
    }

    /// Mark the session dirty and make sure exactly one timer will render it.
    fn schedule(&self, chat_id: &str) {
        let min_interval = Duration::from_millis(self.inner.config.min_update_interval_ms);
        let mut sessions = self.inner.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(chat_id) else {
            return;
        };
        session.dirty = true;
        if session.timer.is_some() || session.anchor_dead {
            return;
        }
        let delay = min_interval.saturating_sub(session.last_edit.elapsed());
        let inner = self.inner.clone();
        let chat = chat_id.to_string();
        let generation = session.generation;
        session.timer = Some(tokio::spawn(async move {
            run_timer(inner, chat, generation, delay).await;
        }));
    }
}

/// Timer body: sleep, render if dirty, edit, repeat while changes keep coming.
async fn run_timer(inner: Arc<Inner>, chat_id: String, generation: u64, mut delay: Duration) {
    let min_interval = Duration::from_millis(inner.config.min_update_interval_ms);

    loop {
        tokio::time::sleep(delay).await;

        let (text, anchor) = {
            let mut sessions = inner.sessions.lock().unwrap();
            let Some(session) = sessions
                .get_mut(&chat_id)
                .filter(|s| s.generation == generation)
            else {
                return;
            };
            if !session.dirty || session.anchor_dead {
                session.timer = None;
                return;
            }
            session.dirty = false;
            session.last_edit = Instant::now();
            let text = session.render_live(&inner.config);
            if session.last_rendered.as_ref() == Some(&text) {
                session.timer = None;
                return;
            }
            session.last_rendered = Some(text.clone());
            (text, session.anchor_message_id)
        };

        let result = inner.deliverer.edit_formatted(&chat_id, anchor, &text).await;

        let mut sessions = inner.sessions.lock().unwrap();
        let Some(session) = sessions
            .get_mut(&chat_id)
            .filter(|s| s.generation == generation)
        else {
            return;
        };
        if let Err(e) = result {
            if matches!(e, RelayError::PermanentSend(_)) {
                warn!(chat_id = %chat_id, anchor, error = %e, "Anchor can no longer be edited; live updates stopped");
                session.anchor_dead = true;
            } else {
                warn!(chat_id = %chat_id, anchor, error = %e, "Status edit failed");
                session.last_rendered = None;
                session.dirty = true;
            }
        }
        if session.dirty && !session.anchor_dead {
            delay = min_interval.saturating_sub(session.last_edit.elapsed());
            continue;
        }
        session.timer = None;
        break;
    }
}
