//! Relay facade for ZeptoRelay
//!
//! The `Relay` owns every control-plane component built from one [`Config`]
//! and routes agent output to them:
//!
//! ```text
//!                 push_input                         stream()
//! platform ───────────────────> StreamRegistry ──────────────────> agent loop
//!                                                                      │
//!                      handle_event(AgentEvent) <──────────────────────┘
//!                               │
//!          ┌────────────────────┼──────────────────────┐
//!          ▼                    ▼                      ▼
//!  MessageAggregator     ProgressTracker          Deliverer
//!  (tool-step anchor)    (typing + status)   (dedup → format → limit → retry)
//!          └────────────────────┴──────────────────────┘
//!                               │
//!                               ▼
//!                       MessagingPlatform
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{AgentEvent, InboundItem, QueueStats, StreamHandle, StreamRegistry};
use crate::config::Config;
use crate::delivery::Deliverer;
use crate::error::Result;
use crate::format::{EntityKind, FormattedText};
use crate::platform::MessagingPlatform;
use crate::progress::{MessageAggregator, ProgressTracker};
use crate::store::{AnchorKind, AnchorRecord, AnchorSnapshot, StateStore, ANCHORS_KEY};
use crate::utils::metrics::{Counter, DeliveryMetrics, Gauge, MetricsSnapshot};

/// Line written into anchors that were live when the process stopped.
const INTERRUPTED_TEXT: &str = "⚠️ Interrupted";
const INTERRUPTED_DETAIL: &str = "\nThe bot restarted before this turn finished.";

/// Result of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_buckets_evicted: usize,
    pub dedup_entries_expired: usize,
}

/// Streaming and delivery control plane for one messaging platform.
pub struct Relay {
    config: Config,
    registry: StreamRegistry<InboundItem>,
    deliverer: Arc<Deliverer>,
    aggregator: MessageAggregator,
    tracker: ProgressTracker,
    metrics: Arc<DeliveryMetrics>,
    store: Option<Arc<dyn StateStore>>,
}

impl Relay {
    /// Build every component from `config`. Fails if the config is invalid.
    pub fn new(
        config: Config,
        platform: Arc<dyn MessagingPlatform>,
        store: Option<Arc<dyn StateStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(DeliveryMetrics::new());
        let deliverer = Arc::new(Deliverer::new(&config, platform, metrics.clone()));
        let aggregator = MessageAggregator::new(config.aggregator.clone(), deliverer.clone());
        let tracker = ProgressTracker::new(config.progress.clone(), deliverer.clone());
        let registry = StreamRegistry::new(config.queue.capacity, config.queue.drop_policy);

        info!(
            platform = %deliverer.platform().name(),
            store = store.as_ref().map(|s| s.name()).unwrap_or("none"),
            "Relay initialized"
        );

        Ok(Self {
            config,
            registry,
            deliverer,
            aggregator,
            tracker,
            metrics,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn deliverer(&self) -> &Arc<Deliverer> {
        &self.deliverer
    }

    pub fn aggregator(&self) -> &MessageAggregator {
        &self.aggregator
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<DeliveryMetrics> {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Inbound streams
    // ------------------------------------------------------------------

    /// The conversation's input stream, created on first use.
    pub fn stream(&self, chat_id: &str) -> StreamHandle<InboundItem> {
        self.registry.get_or_create(chat_id)
    }

    /// Push an inbound item. Returns whether it was accepted; never fails.
    pub fn push_input(&self, chat_id: &str, item: InboundItem) -> bool {
        let dropped_before = self.registry.stats(chat_id).map_or(0, |s| s.dropped);
        let accepted = self.registry.add_message(chat_id, item);
        let dropped_after = self.registry.stats(chat_id).map_or(0, |s| s.dropped);
        if dropped_after > dropped_before {
            self.metrics
                .add(Counter::QueueDropped, dropped_after - dropped_before);
        }
        accepted
    }

    pub fn queue_stats(&self, chat_id: &str) -> Option<QueueStats> {
        self.registry.stats(chat_id)
    }

    /// Let the consumer drain what is buffered, then end the stream.
    pub fn end_stream(&self, chat_id: &str) -> bool {
        self.registry.end(chat_id)
    }

    /// Tear down the conversation: the stream plus any progress and
    /// aggregation sessions. Returns whether anything was running.
    pub fn abort(&self, chat_id: &str) -> bool {
        let stream = self.registry.abort(chat_id);
        let aggregation = self.aggregator.abort_session(chat_id);
        let progress = self.tracker.abort(chat_id);
        if stream || aggregation || progress {
            info!(chat_id = %chat_id, "Conversation aborted");
        }
        stream || aggregation || progress
    }

    // ------------------------------------------------------------------
    // Agent output
    // ------------------------------------------------------------------

    /// Route one agent event.
    ///
    /// With an anchor, tool steps aggregate into it and the tracker runs
    /// the typing heartbeat only; without one, the tracker keeps its own
    /// status message. Only `Text` delivery can fail.
    pub async fn handle_event(&self, chat_id: &str, event: AgentEvent) -> Result<()> {
        match event {
            AgentEvent::TurnStarted { anchor_message_id } => {
                match anchor_message_id {
                    Some(anchor) => {
                        self.aggregator.start_session(chat_id, anchor);
                        self.tracker.start_heartbeat_only(chat_id);
                    }
                    None => self.tracker.start(chat_id, None),
                }
                debug!(chat_id = %chat_id, anchor = ?anchor_message_id, "Turn started");
            }
            AgentEvent::ToolUse {
                tool_id,
                name,
                input,
            } => {
                self.aggregator.add_step(chat_id, &name, &tool_id, &input);
                self.tracker.update_tool(chat_id, &name, &input).await;
            }
            AgentEvent::ToolResult {
                tool_id,
                content,
                is_error,
            } => {
                self.aggregator
                    .complete_step(chat_id, &tool_id, &content, is_error);
            }
            AgentEvent::Text { text } => {
                if self.deliverer.send_markdown(chat_id, &text).await?.is_some()
                    && self.tracker.resume(chat_id)
                {
                    debug!(chat_id = %chat_id, "Reply delivered, status updates resumed");
                }
            }
            AgentEvent::System { text } => {
                self.tracker.set_status(chat_id, &text).await;
            }
            AgentEvent::TurnCompleted { success } => {
                self.aggregator.end_session(chat_id).await;
                self.tracker.complete(chat_id, success).await;
                debug!(chat_id = %chat_id, success, "Turn completed");
            }
            AgentEvent::Aborted => {
                self.aggregator.abort_session(chat_id);
                self.tracker.abort(chat_id);
                debug!(chat_id = %chat_id, "Turn aborted");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Evict idle rate-limit buckets and expired dedup entries, then
    /// refresh gauges.
    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            idle_buckets_evicted: self.deliverer.limiter().cleanup_idle(),
            dedup_entries_expired: self.deliverer.dedup().cleanup_expired(),
        };
        self.refresh_gauges();
        if report != SweepReport::default() {
            crate::log_component!(
                debug,
                "maintenance",
                "Sweep evicted stale entries",
                buckets = report.idle_buckets_evicted,
                dedup = report.dedup_entries_expired,
            );
        }
        report
    }

    pub fn refresh_gauges(&self) {
        let m = &self.metrics;
        m.set_gauge(Gauge::ActiveStreams, self.registry.len() as f64);
        m.set_gauge(
            Gauge::TrackedBuckets,
            self.deliverer.limiter().bucket_count() as f64,
        );
        m.set_gauge(Gauge::QueueUtilization, self.registry.peak_utilization());
        m.set_gauge(Gauge::ActiveProgress, self.tracker.active_count() as f64);
        m.set_gauge(
            Gauge::ActiveAggregations,
            self.aggregator.active_sessions() as f64,
        );
        m.set_gauge(Gauge::DedupEntries, self.deliverer.dedup().len() as f64);
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.refresh_gauges();
        self.metrics.snapshot()
    }

    /// Run [`sweep`](Self::sweep) every `maintenance.sweep_interval_secs`
    /// until `cancel` fires.
    pub fn spawn_maintenance(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        let period = Duration::from_secs(self.config.maintenance.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Maintenance task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        relay.sweep();
                    }
                }
            }
        })
    }

    /// Abort every stream and session. Returns how many were torn down.
    pub fn shutdown(&self) -> usize {
        let streams = self.registry.shutdown();
        let sessions = self.aggregator.shutdown();
        let trackers = self.tracker.shutdown();
        crate::log_component!(
            info,
            "relay",
            "Relay shut down",
            streams = streams,
            sessions = sessions,
            trackers = trackers,
        );
        streams + sessions + trackers
    }

    // ------------------------------------------------------------------
    // Persistence hooks
    // ------------------------------------------------------------------

    /// Record the anchors currently being edited. Returns how many were
    /// written; 0 without a store.
    pub async fn save_state(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut anchors: Vec<AnchorRecord> = self
            .aggregator
            .anchors()
            .into_iter()
            .map(|(chat_id, message_id)| AnchorRecord {
                chat_id,
                message_id,
                kind: AnchorKind::Aggregation,
            })
            .collect();
        anchors.extend(
            self.tracker
                .anchors()
                .into_iter()
                .map(|(chat_id, message_id)| AnchorRecord {
                    chat_id,
                    message_id,
                    kind: AnchorKind::Status,
                }),
        );
        anchors.sort_by(|a, b| (&a.chat_id, a.message_id).cmp(&(&b.chat_id, b.message_id)));

        let count = anchors.len();
        AnchorSnapshot::new(anchors).save(store.as_ref()).await?;
        debug!(count, store = %store.name(), "Relay state saved");
        Ok(count)
    }

    /// Mark anchors left over from a previous run as interrupted, then
    /// clear the record. Returns how many anchors were edited.
    pub async fn recover_state(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let Some(snapshot) = AnchorSnapshot::load(store.as_ref()).await? else {
            return Ok(0);
        };

        let text = interrupted_text();
        let mut edited = 0;
        for anchor in &snapshot.anchors {
            match self
                .deliverer
                .edit_formatted(&anchor.chat_id, anchor.message_id, &text)
                .await
            {
                Ok(()) => edited += 1,
                Err(e) => warn!(
                    chat_id = %anchor.chat_id,
                    message_id = anchor.message_id,
                    error = %e,
                    "Could not mark anchor as interrupted"
                ),
            }
        }
        store.remove(ANCHORS_KEY).await?;
        info!(
            recovered = edited,
            total = snapshot.anchors.len(),
            saved_at = %snapshot.saved_at,
            "Recovered state from previous run"
        );
        Ok(edited)
    }
}

fn interrupted_text() -> FormattedText {
    let mut text = FormattedText::default();
    text.push_entity(EntityKind::Bold, INTERRUPTED_TEXT);
    text.push(INTERRUPTED_DETAIL);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DropPolicy;
    use crate::platform::{MessageId, PlatformOp, RecordingPlatform};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn anchor_ids(records: &[AnchorRecord]) -> Vec<(&str, MessageId)> {
        records
            .iter()
            .map(|r| (r.chat_id.as_str(), r.message_id))
            .collect()
    }

    fn relay_with(
        configure: impl FnOnce(&mut Config),
        store: Option<Arc<dyn StateStore>>,
    ) -> (Relay, Arc<RecordingPlatform>) {
        let mut config = Config::default();
        configure(&mut config);
        let platform = Arc::new(RecordingPlatform::new());
        let relay = Relay::new(config, platform.clone(), store).unwrap();
        (relay, platform)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.queue.capacity = 0;
        let platform = Arc::new(RecordingPlatform::new());
        assert!(Relay::new(config, platform, None).is_err());
    }

    #[tokio::test]
    async fn test_push_input_and_abort() {
        let (relay, _platform) = relay_with(
            |c| {
                c.queue.capacity = 2;
                c.queue.drop_policy = DropPolicy::Oldest;
            },
            None,
        );
        assert!(!relay.push_input("c", InboundItem::user("c", "u", "early")));

        let stream = relay.stream("c");
        for text in ["a", "b", "c"] {
            assert!(relay.push_input("c", InboundItem::user("c", "u", text)));
        }
        assert_eq!(relay.metrics().counter(Counter::QueueDropped), 1);
        assert_eq!(stream.next().await.unwrap().text(), Some("b"));

        assert!(relay.abort("c"));
        assert!(stream.next().await.is_none());
        assert!(!relay.abort("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_with_anchor_aggregates_steps() {
        let (relay, platform) = relay_with(|c| c.progress.show_typing = false, None);
        relay
            .handle_event("c", AgentEvent::TurnStarted { anchor_message_id: Some(7) })
            .await
            .unwrap();
        relay
            .handle_event(
                "c",
                AgentEvent::ToolUse {
                    tool_id: "t1".into(),
                    name: "Read".into(),
                    input: json!({"file_path": "src/lib.rs"}),
                },
            )
            .await
            .unwrap();
        relay
            .handle_event(
                "c",
                AgentEvent::ToolResult {
                    tool_id: "t1".into(),
                    content: "ok".into(),
                    is_error: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(relay.aggregator().step_count("c"), Some(1));

        relay
            .handle_event("c", AgentEvent::TurnCompleted { success: true })
            .await
            .unwrap();
        assert!(!relay.aggregator().has_session("c"));
        assert!(!relay.tracker().is_active("c"));
        assert_eq!(platform.count(PlatformOp::Send), 0);
        assert!(platform.last_edit(7).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_without_anchor_uses_status_message() {
        let (relay, platform) = relay_with(|c| c.progress.show_typing = false, None);
        relay
            .handle_event("c", AgentEvent::TurnStarted { anchor_message_id: None })
            .await
            .unwrap();
        relay
            .handle_event(
                "c",
                AgentEvent::ToolUse {
                    tool_id: "t1".into(),
                    name: "Bash".into(),
                    input: json!({"command": "cargo fmt"}),
                },
            )
            .await
            .unwrap();
        assert!(!relay.aggregator().has_session("c"));
        assert_eq!(platform.count(PlatformOp::Send), 1);

        relay
            .handle_event("c", AgentEvent::Text { text: "**done**".into() })
            .await
            .unwrap();
        assert_eq!(platform.sent_texts().last().map(String::as_str), Some("done"));

        relay
            .handle_event("c", AgentEvent::TurnCompleted { success: false })
            .await
            .unwrap();
        let status_id = 1;
        assert!(platform.last_edit(status_id).unwrap().starts_with("❌ Failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_reply_resumes_held_pause() {
        let (relay, platform) = relay_with(
            |c| {
                c.progress.show_typing = false;
                c.progress.auto_pause_on_rate_limit = false;
            },
            None,
        );
        relay
            .handle_event("c", AgentEvent::TurnStarted { anchor_message_id: None })
            .await
            .unwrap();
        relay
            .handle_event(
                "c",
                AgentEvent::ToolUse {
                    tool_id: "t1".into(),
                    name: "Read".into(),
                    input: json!({"file_path": "a.rs"}),
                },
            )
            .await
            .unwrap();

        platform.fail_next(
            PlatformOp::Edit,
            crate::error::PlatformError::rate_limited(None, "Too Many Requests: retry after 2"),
        );
        tokio::time::sleep(Duration::from_secs(4)).await;
        relay.tracker().set_status("c", "thinking").await;
        assert!(relay.tracker().is_paused("c"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(relay.tracker().is_paused("c"));
        relay
            .handle_event("c", AgentEvent::Text { text: "partial answer".into() })
            .await
            .unwrap();
        assert!(!relay.tracker().is_paused("c"));
        relay.abort("c");
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_event_stops_sessions() {
        let (relay, platform) = relay_with(|_| {}, None);
        relay
            .handle_event("c", AgentEvent::TurnStarted { anchor_message_id: Some(3) })
            .await
            .unwrap();
        relay.handle_event("c", AgentEvent::Aborted).await.unwrap();
        assert!(!relay.aggregator().has_session("c"));
        assert!(!relay.tracker().is_active("c"));

        let typing = platform.count(PlatformOp::Typing);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(platform.count(PlatformOp::Typing), typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_and_recover_state() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let (relay, _) = relay_with(|c| c.progress.show_typing = false, Some(store.clone()));
        relay
            .handle_event("a", AgentEvent::TurnStarted { anchor_message_id: Some(10) })
            .await
            .unwrap();
        relay.tracker().start("b", Some(20));
        assert_eq!(relay.save_state().await.unwrap(), 2);

        let snapshot = AnchorSnapshot::load(store.as_ref()).await.unwrap().unwrap();
        assert_eq!(anchor_ids(&snapshot.anchors), vec![("a", 10), ("b", 20)]);
        assert_eq!(snapshot.anchors[0].kind, AnchorKind::Aggregation);
        relay.shutdown();

        let (restarted, platform) = relay_with(|_| {}, Some(store.clone()));
        assert_eq!(restarted.recover_state().await.unwrap(), 2);
        assert!(platform.last_edit(10).unwrap().starts_with("⚠️ Interrupted"));
        assert!(platform.last_edit(20).is_some());
        assert!(store.load(ANCHORS_KEY).await.unwrap().is_none());
        assert_eq!(restarted.recover_state().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_state_hooks_without_store() {
        let (relay, _) = relay_with(|_| {}, None);
        assert_eq!(relay.save_state().await.unwrap(), 0);
        assert_eq!(relay.recover_state().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_and_refreshes_gauges() {
        let (relay, _) = relay_with(|c| c.dedup.ttl_ms = 1_000, None);
        relay.deliverer().send_markdown("c", "hello").await.unwrap();
        let _stream = relay.stream("c");
        assert_eq!(relay.deliverer().dedup().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let report = relay.sweep();
        assert_eq!(report.dedup_entries_expired, 1);
        assert_eq!(relay.metrics().gauge(Gauge::ActiveStreams), Some(1.0));
        assert_eq!(relay.metrics().gauge(Gauge::DedupEntries), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_stops_on_cancel() {
        let (relay, _) = relay_with(|c| c.maintenance.sweep_interval_secs = 1, None);
        let relay = Arc::new(relay);
        let cancel = CancellationToken::new();
        let handle = relay.spawn_maintenance(cancel.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(relay.metrics().gauge(Gauge::ActiveStreams).is_some());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_counts_everything() {
        let (relay, _) = relay_with(|c| c.progress.show_typing = false, None);
        let _s = relay.stream("x");
        relay.aggregator().start_session("y", 1);
        relay.tracker().start("z", Some(2));
        assert_eq!(relay.shutdown(), 3);
        assert_eq!(relay.shutdown(), 0);
    }
}
