//! Configuration type definitions for ZeptoRelay
//!
//! This module defines all configuration structs used by the delivery control plane.
//! All types implement serde traits for JSON serialization and have sensible defaults
//! tuned for Telegram's published limits (30 msg/s globally, 20 msg/min per group).

use serde::{Deserialize, Serialize};

use crate::bus::DropPolicy;

/// Main configuration struct for ZeptoRelay
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging output configuration
    pub logging: LoggingConfig,
    /// Per-conversation input queue configuration
    pub queue: QueueConfig,
    /// Global and per-conversation send throttling
    pub rate_limit: RateLimitConfig,
    /// Retry/backoff policy for platform calls
    pub retry: RetryConfig,
    /// Duplicate-send suppression
    pub dedup: DedupConfig,
    /// Tool-step aggregation into a single status message
    pub aggregator: AggregatorConfig,
    /// Per-turn progress heartbeat and status editing
    pub progress: ProgressConfig,
    /// Rich-text rendering limits
    pub format: FormatConfig,
    /// Background sweep of idle buckets and expired dedup entries
    pub maintenance: MaintenanceConfig,
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// Compact single-line output, grep-friendly
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Optional file to append JSON logs to
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}

// ============================================================================
// Queue Configuration
// ============================================================================

/// Per-conversation input queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum buffered items per conversation
    pub capacity: usize,
    /// What happens when a producer hits a full queue
    pub drop_policy: DropPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            drop_policy: DropPolicy::Oldest,
        }
    }
}

// ============================================================================
// Rate Limit Configuration
// ============================================================================

/// Token-bucket rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Global tokens per window
    pub global_capacity: u32,
    /// Global refill window in milliseconds
    pub global_window_ms: u64,
    /// Extra tokens the global bucket may accumulate above capacity
    pub global_burst: u32,
    /// Per-conversation tokens per window
    pub chat_capacity: u32,
    /// Per-conversation refill window in milliseconds
    pub chat_window_ms: u64,
    /// Per-conversation buckets idle this long are evicted by the sweep
    pub idle_eviction_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_capacity: 30,
            global_window_ms: 1_000,
            global_burst: 5,
            chat_capacity: 20,
            chat_window_ms: 60_000,
            idle_eviction_secs: 3_600,
        }
    }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry/backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound for computed delays, in milliseconds
    pub max_delay_ms: u64,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Apply +/-25% jitter to computed delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

// ============================================================================
// Dedup Configuration
// ============================================================================

/// Duplicate-send suppression configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Identical content to the same chat within this window is suppressed
    pub ttl_ms: u64,
    /// Maximum tracked entries before the oldest is evicted
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5_000,
            capacity: 1_000,
        }
    }
}

// ============================================================================
// Aggregator Configuration
// ============================================================================

/// Tool-step aggregation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Minimum time between two edits of the anchor message, in milliseconds
    pub min_update_interval_ms: u64,
    /// Maximum steps listed individually in the final summary
    pub max_visible_steps: usize,
    /// Medium-tier steps collapse into a count once more than this many accumulate
    pub collapse_threshold: usize,
    /// Maximum high-tier steps shown in the live render
    pub live_recent_steps: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 1_500,
            max_visible_steps: 10,
            collapse_threshold: 3,
            live_recent_steps: 5,
        }
    }
}

// ============================================================================
// Progress Configuration
// ============================================================================

/// Per-turn progress tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Minimum time between two status edits, in milliseconds
    pub edit_interval_ms: u64,
    /// Typing indicator period, in milliseconds
    pub heartbeat_interval_ms: u64,
    /// Periodic status refresh, in milliseconds
    pub status_interval_ms: u64,
    /// Send typing indicators
    pub show_typing: bool,
    /// Maintain an editable status message
    pub show_status_message: bool,
    /// Schedule an automatic resume when throttled
    pub auto_pause_on_rate_limit: bool,
    /// Grow edit/status intervals after throttling
    pub dynamic_interval_adjustment: bool,
    /// Factor applied to intervals on every throttle
    pub interval_growth: f64,
    /// Upper bound for the accumulated interval multiplier
    pub max_interval_multiplier: f64,
    /// Pause used when a throttle carries no retry hint, in milliseconds
    pub fallback_retry_after_ms: u64,
    /// Consecutive non-throttle errors before local backoff kicks in
    pub error_backoff_threshold: u32,
    /// Base local backoff, in milliseconds
    pub error_backoff_base_ms: u64,
    /// Cap for local backoff, in milliseconds
    pub error_backoff_max_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            edit_interval_ms: 3_000,
            heartbeat_interval_ms: 4_500,
            status_interval_ms: 10_000,
            show_typing: true,
            show_status_message: true,
            auto_pause_on_rate_limit: true,
            dynamic_interval_adjustment: true,
            interval_growth: 1.5,
            max_interval_multiplier: 4.0,
            fallback_retry_after_ms: 30_000,
            error_backoff_threshold: 3,
            error_backoff_base_ms: 5_000,
            error_backoff_max_ms: 60_000,
        }
    }
}

// ============================================================================
// Format Configuration
// ============================================================================

/// Rich-text rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    /// Maximum message length in UTF-16 code units
    pub max_message_length: usize,
    /// Blockquotes with more lines than this become expandable
    pub expandable_quote_lines: usize,
    /// Blockquotes longer than this (UTF-16 units) become expandable
    pub expandable_quote_length: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 4_096,
            expandable_quote_lines: 3,
            expandable_quote_length: 200,
        }
    }
}

// ============================================================================
// Maintenance Configuration
// ============================================================================

/// Background sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval between sweeps, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
        }
    }
}
