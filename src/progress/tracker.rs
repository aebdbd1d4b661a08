//! Session progress tracker: typing heartbeat plus a periodically edited
//! status line for one agent turn.
//!
//! States per chat: `inactive → running ⇄ paused → terminal`. A throttling
//! error pauses status edits and typing. With `auto_pause_on_rate_limit` the
//! pause lifts once the provider's retry-after has passed; without it the
//! chat stays paused until [`ProgressTracker::resume`]. Optionally the
//! intervals grow so the next turn is throttled less.
//! Three or more consecutive non-throttling errors switch to a local
//! exponential backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::tools::ToolInput;
use crate::config::ProgressConfig;
use crate::delivery::{parse_retry_after, Deliverer, RetryHint};
use crate::error::RelayError;
use crate::format::{EntityKind, FormattedText};
use crate::platform::MessageId;
use crate::utils::string::format_duration;

/// Observable tracker state for a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Running,
    Paused,
    BackingOff,
}

/// Per-turn progress state.
#[derive(Debug)]
struct ProgressState {
    status_message_id: Option<MessageId>,
    show_status: bool,
    current_status: String,
    tool_count: usize,
    started: Instant,
    paused: bool,
    pause_until: Option<Instant>,
    backoff_until: Option<Instant>,
    interval_multiplier: f64,
    consecutive_errors: u32,
    rate_limit_errors: u32,
    total_errors: u32,
    last_error: Option<String>,
    last_edit: Option<Instant>,
    last_rendered: Option<String>,
    status_dead: bool,
    generation: u64,
    timers: Vec<JoinHandle<()>>,
}

impl ProgressState {
    fn scaled(&self, base_ms: u64) -> Duration {
        Duration::from_millis(base_ms).mul_f64(self.interval_multiplier)
    }

    /// Lift an expired pause or backoff; returns whether sending is allowed.
    fn can_send(&mut self, now: Instant) -> bool {
        if self.paused && self.pause_until.is_some_and(|t| t <= now) {
            self.paused = false;
            self.pause_until = None;
        }
        if self.backoff_until.is_some_and(|t| t <= now) {
            self.backoff_until = None;
        }
        !self.paused && self.backoff_until.is_none()
    }

    fn phase(&self, now: Instant) -> ProgressPhase {
        if self.paused && self.pause_until.map_or(true, |t| t > now) {
            ProgressPhase::Paused
        } else if self.backoff_until.is_some_and(|t| t > now) {
            ProgressPhase::BackingOff
        } else {
            ProgressPhase::Running
        }
    }

    fn render(&self) -> FormattedText {
        let mut out = FormattedText::default();
        out.push_entity(EntityKind::Bold, "⏳ Working");
        out.push(&format!(" · {}", format_duration(self.started.elapsed())));
        if self.tool_count > 0 {
            out.push(&format!(
                " · {} tool{}",
                self.tool_count,
                if self.tool_count == 1 { "" } else { "s" }
            ));
        }
        if !self.current_status.is_empty() {
            out.push("\n").push(&self.current_status);
        }
        out
    }

    fn render_final(&self, success: bool) -> FormattedText {
        let mut out = FormattedText::default();
        let elapsed = format_duration(self.started.elapsed());
        if success {
            out.push_entity(EntityKind::Bold, "✅ Completed");
        } else {
            out.push_entity(EntityKind::Bold, "❌ Failed");
        }
        out.push(&format!(" · {}", elapsed));
        if self.tool_count > 0 {
            out.push(&format!(
                " · {} tool{}",
                self.tool_count,
                if self.tool_count == 1 { "" } else { "s" }
            ));
        }
        if self.total_errors > 0 {
            out.push(&format!(
                "\n⚠️ Some updates could not be delivered ({} errors)",
                self.total_errors
            ));
        }
        out
    }

    fn stop_timers(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

struct TrackerInner {
    states: Mutex<HashMap<String, ProgressState>>,
    deliverer: Arc<Deliverer>,
    config: ProgressConfig,
    generation: AtomicU64,
}

/// Per-chat heartbeat and status editor.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<TrackerInner>,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig, deliverer: Arc<Deliverer>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                states: Mutex::new(HashMap::new()),
                deliverer,
                config,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Begin tracking a turn. With `status_message_id == None` the status
    /// message is sent on the first render and edited afterwards.
    pub fn start(&self, chat_id: &str, status_message_id: Option<MessageId>) {
        let show_status = self.inner.config.show_status_message;
        self.start_with(chat_id, status_message_id, show_status);
    }

    /// Track a turn with the typing heartbeat only (no status message).
    pub fn start_heartbeat_only(&self, chat_id: &str) {
        self.start_with(chat_id, None, false);
    }

    fn start_with(&self, chat_id: &str, status_message_id: Option<MessageId>, show_status: bool) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = ProgressState {
            status_message_id,
            show_status,
            current_status: String::new(),
            tool_count: 0,
            started: Instant::now(),
            paused: false,
            pause_until: None,
            backoff_until: None,
            interval_multiplier: 1.0,
            consecutive_errors: 0,
            rate_limit_errors: 0,
            total_errors: 0,
            last_error: None,
            last_edit: None,
            last_rendered: None,
            status_dead: false,
            generation,
            timers: Vec::new(),
        };

        if self.inner.config.show_typing {
            state.timers.push(tokio::spawn(heartbeat_loop(
                self.inner.clone(),
                chat_id.to_string(),
                generation,
            )));
        }
        if show_status {
            state.timers.push(tokio::spawn(status_loop(
                self.inner.clone(),
                chat_id.to_string(),
                generation,
            )));
        }

        let previous = self
            .inner
            .states
            .lock()
            .unwrap()
            .insert(chat_id.to_string(), state);
        if let Some(mut previous) = previous {
            previous.stop_timers();
            debug!(chat_id = %chat_id, "Replaced running progress tracker");
        }
        debug!(chat_id = %chat_id, show_status, "Progress tracking started");
    }

    /// Show a tool as the current activity. Edits right away unless the
    /// last edit was less than one edit interval ago; the status timer picks
    /// up anything skipped.
    pub async fn update_tool(&self, chat_id: &str, tool_name: &str, input: &Value) {
        let line = ToolInput::from_json(tool_name, input).to_string();
        {
            let mut states = self.inner.states.lock().unwrap();
            let Some(state) = states.get_mut(chat_id) else {
                return;
            };
            state.current_status = line;
            state.tool_count += 1;
        }
        self.inner.refresh(chat_id).await;
    }

    /// Replace the status line with free text.
    pub async fn set_status(&self, chat_id: &str, text: &str) {
        {
            let mut states = self.inner.states.lock().unwrap();
            let Some(state) = states.get_mut(chat_id) else {
                return;
            };
            state.current_status = text.to_string();
        }
        self.inner.refresh(chat_id).await;
    }

    /// Stop timers and render the final line. Returns what was rendered, or
    /// `None` when the chat was not being tracked.
    pub async fn complete(&self, chat_id: &str, success: bool) -> Option<FormattedText> {
        let (text, target) = {
            let mut state = self.inner.states.lock().unwrap().remove(chat_id)?;
            state.stop_timers();
            let target = state
                .status_message_id
                .filter(|_| state.show_status && !state.status_dead);
            (state.render_final(success), target)
        };

        if let Some(message_id) = target {
            if let Err(e) = self
                .inner
                .deliverer
                .edit_formatted(chat_id, message_id, &text)
                .await
            {
                warn!(chat_id = %chat_id, message_id, error = %e, "Final status edit failed");
            }
        }
        debug!(chat_id = %chat_id, success, "Progress tracking completed");
        Some(text)
    }

    /// Stop timers without rendering. Returns whether the chat was tracked.
    pub fn abort(&self, chat_id: &str) -> bool {
        let removed = self.inner.states.lock().unwrap().remove(chat_id);
        match removed {
            Some(mut state) => {
                state.stop_timers();
                debug!(chat_id = %chat_id, "Progress tracking aborted");
                true
            }
            None => false,
        }
    }

    /// Feed a delivery error into the pause/backoff logic.
    pub fn handle_error(&self, chat_id: &str, err: &RelayError) {
        self.inner.handle_error(chat_id, err);
    }

    /// Lift a throttling pause now, e.g. after another delivery to the chat
    /// went through. Returns whether the chat was paused.
    pub fn resume(&self, chat_id: &str) -> bool {
        let mut states = self.inner.states.lock().unwrap();
        match states.get_mut(chat_id) {
            Some(state) if state.paused => {
                state.paused = false;
                state.pause_until = None;
                info!(chat_id = %chat_id, "Progress updates resumed");
                true
            }
            _ => false,
        }
    }

    pub fn phase(&self, chat_id: &str) -> Option<ProgressPhase> {
        let now = Instant::now();
        self.inner
            .states
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|s| s.phase(now))
    }

    pub fn is_active(&self, chat_id: &str) -> bool {
        self.inner.states.lock().unwrap().contains_key(chat_id)
    }

    pub fn is_paused(&self, chat_id: &str) -> bool {
        self.phase(chat_id) == Some(ProgressPhase::Paused)
    }

    pub fn status_message_id(&self, chat_id: &str) -> Option<MessageId> {
        self.inner
            .states
            .lock()
            .unwrap()
            .get(chat_id)
            .and_then(|s| s.status_message_id)
    }

    pub fn interval_multiplier(&self, chat_id: &str) -> Option<f64> {
        self.inner
            .states
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|s| s.interval_multiplier)
    }

    pub fn consecutive_errors(&self, chat_id: &str) -> Option<u32> {
        self.inner
            .states
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|s| s.consecutive_errors)
    }

    /// Chats with an active turn and their status message ids.
    pub fn anchors(&self) -> Vec<(String, MessageId)> {
        self.inner
            .states
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(chat, s)| s.status_message_id.map(|id| (chat.clone(), id)))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.inner.states.lock().unwrap().len()
    }

    /// Abort every tracked chat.
    pub fn shutdown(&self) -> usize {
        let mut states = self.inner.states.lock().unwrap();
        let n = states.len();
        for (_, mut state) in states.drain() {
            state.stop_timers();
        }
        n
    }
}

impl TrackerInner {
    /// Render and push the status line if allowed right now.
    async fn refresh(self: &Arc<Self>, chat_id: &str) {
        let (text, target) = {
            let now = Instant::now();
            let mut states = self.states.lock().unwrap();
            let Some(state) = states.get_mut(chat_id) else {
                return;
            };
            if !state.show_status || state.status_dead || !state.can_send(now) {
                return;
            }
            let edit_interval = state.scaled(self.config.edit_interval_ms);
            if state
                .last_edit
                .is_some_and(|t| now.saturating_duration_since(t) < edit_interval)
            {
                return;
            }
            let text = state.render();
            if state.last_rendered.as_deref() == Some(text.text.as_str()) {
                return;
            }
            state.last_edit = Some(now);
            (text, state.status_message_id)
        };

        let result = match target {
            Some(id) => self
                .deliverer
                .try_edit(chat_id, id, &text)
                .await
                .map(|_| None),
            None => self.deliverer.try_send(chat_id, &text).await.map(Some),
        };

        match result {
            Ok(new_id) => {
                let mut states = self.states.lock().unwrap();
                if let Some(state) = states.get_mut(chat_id) {
                    state.consecutive_errors = 0;
                    state.last_rendered = Some(text.text);
                    if new_id.is_some() {
                        state.status_message_id = new_id;
                    }
                }
            }
            Err(e) => self.handle_error(chat_id, &e),
        }
    }

    fn handle_error(self: &Arc<Self>, chat_id: &str, err: &RelayError) {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.get_mut(chat_id) else {
            return;
        };
        state.total_errors += 1;
        state.last_error = Some(err.to_string());

        if err.is_throttle() {
            state.rate_limit_errors += 1;
            let retry_after = RetryHint::retry_after(err)
                .or_else(|| parse_retry_after(&err.to_string()))
                .unwrap_or_else(|| Duration::from_millis(self.config.fallback_retry_after_ms));
            state.paused = true;
            state.pause_until = self
                .config
                .auto_pause_on_rate_limit
                .then(|| now + retry_after);
            if self.config.dynamic_interval_adjustment {
                state.interval_multiplier = (state.interval_multiplier
                    * self.config.interval_growth)
                    .min(self.config.max_interval_multiplier)
                    .max(1.0);
            }
            warn!(
                chat_id = %chat_id,
                retry_after_ms = retry_after.as_millis() as u64,
                multiplier = state.interval_multiplier,
                rate_limit_errors = state.rate_limit_errors,
                "Progress updates paused after throttling"
            );

            if self.config.auto_pause_on_rate_limit {
                let inner = Arc::clone(self);
                let chat = chat_id.to_string();
                let generation = state.generation;
                state.timers.push(tokio::spawn(async move {
                    tokio::time::sleep(retry_after).await;
                    inner.resume_expired(&chat, generation);
                }));
            }
            return;
        }

        if matches!(err, RelayError::PermanentSend(_)) {
            warn!(chat_id = %chat_id, error = %err, "Status message unusable; status edits stopped");
            state.status_dead = true;
            return;
        }

        state.consecutive_errors += 1;
        if state.consecutive_errors >= self.config.error_backoff_threshold {
            let exponent = (state.consecutive_errors - self.config.error_backoff_threshold).min(16);
            let backoff = Duration::from_millis(
                self.config
                    .error_backoff_base_ms
                    .saturating_mul(1u64 << exponent)
                    .min(self.config.error_backoff_max_ms),
            );
            state.backoff_until = Some(now + backoff);
            warn!(
                chat_id = %chat_id,
                consecutive_errors = state.consecutive_errors,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Backing off progress updates after repeated errors"
            );
        } else {
            debug!(
                chat_id = %chat_id,
                consecutive_errors = state.consecutive_errors,
                error = %err,
                "Progress update failed"
            );
        }
    }

    fn resume_expired(&self, chat_id: &str, generation: u64) {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(chat_id).filter(|s| s.generation == generation) {
            if state.paused && state.pause_until.is_some_and(|t| t <= now) {
                state.paused = false;
                state.pause_until = None;
                info!(chat_id = %chat_id, "Progress updates resumed");
            }
        }
    }

    /// Whether the tracker for `chat_id` with `generation` is live and may send.
    fn gate(&self, chat_id: &str, generation: u64) -> Option<bool> {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap();
        let state = states
            .get_mut(chat_id)
            .filter(|s| s.generation == generation)?;
        Some(state.can_send(now))
    }

    fn interval(&self, chat_id: &str, generation: u64, base_ms: u64) -> Option<Duration> {
        self.states
            .lock()
            .unwrap()
            .get(chat_id)
            .filter(|s| s.generation == generation)
            .map(|s| s.scaled(base_ms))
    }
}

async fn heartbeat_loop(inner: Arc<TrackerInner>, chat_id: String, generation: u64) {
    loop {
        match inner.gate(&chat_id, generation) {
            None => return,
            Some(true) => {
                if let Err(e) = inner.deliverer.send_typing(&chat_id).await {
                    inner.handle_error(&chat_id, &e);
                }
            }
            Some(false) => {}
        }
        let Some(interval) = inner.interval(&chat_id, generation, inner.config.heartbeat_interval_ms)
        else {
            return;
        };
        tokio::time::sleep(interval).await;
    }
}

async fn status_loop(inner: Arc<TrackerInner>, chat_id: String, generation: u64) {
    loop {
        let Some(interval) = inner.interval(&chat_id, generation, inner.config.status_interval_ms)
        else {
            return;
        };
        tokio::time::sleep(interval).await;
        if inner.gate(&chat_id, generation).is_none() {
            return;
        }
        inner.refresh(&chat_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::PlatformError;
    use crate::platform::{PlatformOp, RecordingPlatform};
    use crate::utils::metrics::DeliveryMetrics;
    use serde_json::json;

    fn setup(configure: impl FnOnce(&mut ProgressConfig)) -> (ProgressTracker, Arc<RecordingPlatform>) {
        let config = Config::default();
        let mut progress = config.progress.clone();
        configure(&mut progress);
        let platform = Arc::new(RecordingPlatform::new());
        let deliverer = Arc::new(Deliverer::new(
            &config,
            platform.clone(),
            Arc::new(DeliveryMetrics::new()),
        ));
        (ProgressTracker::new(progress, deliverer), platform)
    }

    fn read(path: &str) -> Value {
        json!({ "file_path": path })
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_and_status_timers() {
        let (tracker, platform) = setup(|_| {});
        tracker.start("c", Some(1));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(platform.count(PlatformOp::Typing), 1);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(platform.count(PlatformOp::Typing), 3);
        assert_eq!(platform.count(PlatformOp::Edit), 1);
        assert!(platform.last_edit(1).unwrap().starts_with("⏳ Working"));
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_tool_respects_edit_interval() {
        let (tracker, platform) = setup(|c| c.show_typing = false);
        tracker.start("c", Some(1));

        tracker.update_tool("c", "Read", &read("src/lib.rs")).await;
        assert_eq!(platform.count(PlatformOp::Edit), 1);
        assert!(platform.last_edit(1).unwrap().contains("📖 Read: src/lib.rs"));

        tracker.update_tool("c", "Read", &read("src/main.rs")).await;
        assert_eq!(platform.count(PlatformOp::Edit), 1);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        tracker.update_tool("c", "Read", &read("Cargo.toml")).await;
        assert_eq!(platform.count(PlatformOp::Edit), 2);
        assert!(platform.last_edit(1).unwrap().contains("3 tools"));
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_message_sent_when_missing() {
        let (tracker, platform) = setup(|c| c.show_typing = false);
        tracker.start("c", None);
        tracker.update_tool("c", "Bash", &json!({"command": "ls"})).await;
        assert_eq!(platform.count(PlatformOp::Send), 1);
        assert_eq!(tracker.status_message_id("c"), Some(1));

        tokio::time::sleep(Duration::from_millis(3100)).await;
        tracker.update_tool("c", "Bash", &json!({"command": "pwd"})).await;
        assert_eq!(platform.count(PlatformOp::Send), 1);
        assert_eq!(platform.count(PlatformOp::Edit), 1);
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_pauses_then_auto_resumes() {
        let (tracker, platform) = setup(|c| c.show_typing = false);
        platform.fail_next(
            PlatformOp::Edit,
            PlatformError::rate_limited(None, "Too Many Requests: retry after 5"),
        );
        tracker.start("c", Some(1));
        tracker.update_tool("c", "Read", &read("a.rs")).await;

        assert!(tracker.is_paused("c"));
        assert_eq!(tracker.interval_multiplier("c"), Some(1.5));

        tokio::time::sleep(Duration::from_millis(4000)).await;
        tracker.update_tool("c", "Read", &read("b.rs")).await;
        assert_eq!(platform.attempts(PlatformOp::Edit), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(tracker.phase("c"), Some(ProgressPhase::Running));
        tracker.update_tool("c", "Read", &read("c.rs")).await;
        assert_eq!(platform.count(PlatformOp::Edit), 1);
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_pause_without_hint() {
        let (tracker, platform) = setup(|c| {
            c.show_typing = false;
            c.fallback_retry_after_ms = 7000;
        });
        platform.fail_next(PlatformOp::Edit, PlatformError::rate_limited(None, "429"));
        tracker.start("c", Some(1));
        tracker.update_tool("c", "Read", &read("a.rs")).await;

        tokio::time::sleep(Duration::from_millis(6900)).await;
        assert!(tracker.is_paused("c"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!tracker.is_paused("c"));
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_held_until_resume_without_auto_pause() {
        let (tracker, platform) = setup(|c| {
            c.show_typing = false;
            c.auto_pause_on_rate_limit = false;
        });
        platform.fail_next(
            PlatformOp::Edit,
            PlatformError::rate_limited(None, "Too Many Requests: retry after 5"),
        );
        tracker.start("c", Some(1));
        tracker.update_tool("c", "Read", &read("a.rs")).await;
        assert!(tracker.is_paused("c"));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(tracker.is_paused("c"));
        tracker.update_tool("c", "Read", &read("b.rs")).await;
        assert_eq!(platform.attempts(PlatformOp::Edit), 1);

        assert!(tracker.resume("c"));
        assert!(!tracker.resume("c"));
        tracker.update_tool("c", "Read", &read("c.rs")).await;
        assert_eq!(platform.count(PlatformOp::Edit), 1);
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_multiplier_capped() {
        let (tracker, _platform) = setup(|c| c.show_typing = false);
        tracker.start("c", Some(1));
        for _ in 0..10 {
            tracker.handle_error(
                "c",
                &PlatformError::rate_limited(Some(Duration::from_millis(10)), "429").into(),
            );
        }
        assert_eq!(tracker.interval_multiplier("c"), Some(4.0));
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_errors_trigger_backoff() {
        let (tracker, platform) = setup(|c| c.show_typing = false);
        tracker.start("c", Some(1));
        for i in 0..3 {
            platform.fail_next(PlatformOp::Edit, PlatformError::Server("502".into()));
            tracker.update_tool("c", "Read", &read(&format!("{i}.rs"))).await;
            tokio::time::sleep(Duration::from_millis(3100)).await;
        }
        assert_eq!(tracker.consecutive_errors("c"), Some(3));
        // Backoff of 5s was set at ~6.2s; we are at ~9.3s.
        assert_eq!(tracker.phase("c"), Some(ProgressPhase::BackingOff));

        tracker.update_tool("c", "Read", &read("x.rs")).await;
        assert_eq!(platform.attempts(PlatformOp::Edit), 3);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        tracker.update_tool("c", "Read", &read("y.rs")).await;
        assert_eq!(platform.count(PlatformOp::Edit), 1);
        assert_eq!(tracker.consecutive_errors("c"), Some(0));
        tracker.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_renders_final_and_stops_timers() {
        let (tracker, platform) = setup(|_| {});
        tracker.start("c", Some(1));
        tracker.update_tool("c", "Read", &read("a.rs")).await;

        let text = tracker.complete("c", true).await.unwrap();
        assert!(text.text.starts_with("✅ Completed"));
        assert!(text.text.contains("1 tool"));
        assert_eq!(platform.last_edit(1).as_deref(), Some(text.text.as_str()));

        let typing = platform.count(PlatformOp::Typing);
        let edits = platform.count(PlatformOp::Edit);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(platform.count(PlatformOp::Typing), typing);
        assert_eq!(platform.count(PlatformOp::Edit), edits);
        assert!(!tracker.is_active("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_turn_and_abort() {
        let (tracker, platform) = setup(|c| c.show_typing = false);
        tracker.start("c", Some(1));
        let text = tracker.complete("c", false).await.unwrap();
        assert!(text.text.starts_with("❌ Failed"));

        tracker.start("d", Some(2));
        assert!(tracker.abort("d"));
        assert!(!tracker.abort("d"));
        assert!(tracker.complete("d", true).await.is_none());
        assert_eq!(platform.last_edit(2), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_only_never_edits() {
        let (tracker, platform) = setup(|_| {});
        tracker.start_heartbeat_only("c");
        tracker.update_tool("c", "Read", &read("a.rs")).await;
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(platform.count(PlatformOp::Edit), 0);
        assert_eq!(platform.count(PlatformOp::Send), 0);
        assert!(platform.count(PlatformOp::Typing) >= 4);
        assert!(tracker.complete("c", true).await.is_some());
        assert_eq!(platform.count(PlatformOp::Edit), 0);
    }
}
