//! Delivery metrics collector.
//!
//! Lightweight, thread-safe counters and gauges for the outbound pipeline.
//! Uses interior mutability via `Mutex` so all recording methods take `&self`
//! and the collector can be shared as `Arc<DeliveryMetrics>`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Monotonic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Counter {
    MessagesSent,
    MessagesEdited,
    MessagesDeleted,
    TypingSent,
    Throttled,
    Retries,
    TransientFailures,
    PermanentFailures,
    DuplicatesSuppressed,
    QueueDropped,
}

impl Counter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::MessagesSent => "messages_sent",
            Counter::MessagesEdited => "messages_edited",
            Counter::MessagesDeleted => "messages_deleted",
            Counter::TypingSent => "typing_sent",
            Counter::Throttled => "throttled",
            Counter::Retries => "retries",
            Counter::TransientFailures => "transient_failures",
            Counter::PermanentFailures => "permanent_failures",
            Counter::DuplicatesSuppressed => "duplicates_suppressed",
            Counter::QueueDropped => "queue_dropped",
        }
    }
}

/// Point-in-time values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Gauge {
    ActiveStreams,
    TrackedBuckets,
    QueueUtilization,
    ActiveProgress,
    ActiveAggregations,
    DedupEntries,
}

impl Gauge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gauge::ActiveStreams => "active_streams",
            Gauge::TrackedBuckets => "tracked_buckets",
            Gauge::QueueUtilization => "queue_utilization",
            Gauge::ActiveProgress => "active_progress",
            Gauge::ActiveAggregations => "active_aggregations",
            Gauge::DedupEntries => "dedup_entries",
        }
    }
}

/// Serializable view of the collector.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<&'static str, u64>,
    pub gauges: BTreeMap<&'static str, f64>,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Counters and gauges for the delivery pipeline.
#[derive(Debug)]
pub struct DeliveryMetrics {
    counters: Mutex<BTreeMap<Counter, u64>>,
    gauges: Mutex<BTreeMap<Gauge, f64>>,
    started: Instant,
}

impl Default for DeliveryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
            gauges: Mutex::new(BTreeMap::new()),
            started: Instant::now(),
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        if n == 0 {
            return;
        }
        *self.counters.lock().unwrap().entry(counter).or_insert(0) += n;
    }

    pub fn set_gauge(&self, gauge: Gauge, value: f64) {
        self.gauges.lock().unwrap().insert(gauge, value);
    }

    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters
            .lock()
            .unwrap()
            .get(&counter)
            .copied()
            .unwrap_or(0)
    }

    pub fn gauge(&self, gauge: Gauge) -> Option<f64> {
        self.gauges.lock().unwrap().get(&gauge).copied()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Serializable copy of every counter and gauge.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        let gauges = self
            .gauges
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        MetricsSnapshot {
            counters,
            gauges,
            timestamp: Utc::now(),
            uptime_secs: self.uptime().as_secs(),
        }
    }

    /// One-line human-readable summary.
    ///
    /// ```text
    /// sent 12 | edited 40 | throttled 2 | retries 3 | failed 0/1 | dup 1
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "sent {} | edited {} | throttled {} | retries {} | failed {}/{} | dup {}",
            self.counter(Counter::MessagesSent),
            self.counter(Counter::MessagesEdited),
            self.counter(Counter::Throttled),
            self.counter(Counter::Retries),
            self.counter(Counter::TransientFailures),
            self.counter(Counter::PermanentFailures),
            self.counter(Counter::DuplicatesSuppressed),
        )
    }
}
