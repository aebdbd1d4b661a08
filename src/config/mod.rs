//! Configuration management for ZeptoRelay
//!
//! This module provides configuration loading and validation.
//! Configuration is loaded from `~/.zeptorelay/config.json` with environment variable overrides.
//! There is no global instance: callers build a [`crate::Relay`] from the loaded value.

mod types;

pub use types::*;

use crate::error::{RelayError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the ZeptoRelay configuration directory path (~/.zeptorelay)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zeptorelay")
    }

    /// Returns the path to the config file (~/.zeptorelay/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    /// Environment variables can override config values using the pattern:
    /// `ZEPTORELAY_SECTION_KEY`
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: ZEPTORELAY_SECTION_KEY
    fn apply_env_overrides(&mut self) {
        // Logging
        if let Ok(val) = std::env::var("ZEPTORELAY_LOGGING_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("ZEPTORELAY_LOGGING_FORMAT") {
            match val.to_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "pretty" => self.logging.format = LogFormat::Pretty,
                "component" => self.logging.format = LogFormat::Component,
                _ => {}
            }
        }

        // Queue
        override_parsed("ZEPTORELAY_QUEUE_CAPACITY", &mut self.queue.capacity);

        // Rate limit
        override_parsed(
            "ZEPTORELAY_RATE_LIMIT_GLOBAL_CAPACITY",
            &mut self.rate_limit.global_capacity,
        );
        override_parsed(
            "ZEPTORELAY_RATE_LIMIT_GLOBAL_BURST",
            &mut self.rate_limit.global_burst,
        );
        override_parsed(
            "ZEPTORELAY_RATE_LIMIT_CHAT_CAPACITY",
            &mut self.rate_limit.chat_capacity,
        );
        override_parsed(
            "ZEPTORELAY_RATE_LIMIT_CHAT_WINDOW_MS",
            &mut self.rate_limit.chat_window_ms,
        );

        // Retry
        override_parsed("ZEPTORELAY_RETRY_MAX_RETRIES", &mut self.retry.max_retries);
        override_parsed(
            "ZEPTORELAY_RETRY_INITIAL_DELAY_MS",
            &mut self.retry.initial_delay_ms,
        );
        override_parsed("ZEPTORELAY_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms);

        // Dedup
        override_parsed("ZEPTORELAY_DEDUP_TTL_MS", &mut self.dedup.ttl_ms);

        // Progress
        override_parsed(
            "ZEPTORELAY_PROGRESS_EDIT_INTERVAL_MS",
            &mut self.progress.edit_interval_ms,
        );
        override_parsed(
            "ZEPTORELAY_PROGRESS_SHOW_TYPING",
            &mut self.progress.show_typing,
        );
        override_parsed(
            "ZEPTORELAY_PROGRESS_AUTO_PAUSE_ON_RATE_LIMIT",
            &mut self.progress.auto_pause_on_rate_limit,
        );
    }

    /// Validate the configuration, rejecting values that would stall or panic at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 {
            return Err(RelayError::Config("queue.capacity must be > 0".into()));
        }
        let rl = &self.rate_limit;
        if rl.global_capacity == 0 || rl.chat_capacity == 0 {
            return Err(RelayError::Config(
                "rate_limit capacities must be > 0".into(),
            ));
        }
        if rl.global_window_ms == 0 || rl.chat_window_ms == 0 {
            return Err(RelayError::Config("rate_limit windows must be > 0".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(RelayError::Config("retry.multiplier must be >= 1.0".into()));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(RelayError::Config(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.dedup.capacity == 0 {
            return Err(RelayError::Config("dedup.capacity must be > 0".into()));
        }
        let p = &self.progress;
        if p.edit_interval_ms == 0 || p.heartbeat_interval_ms == 0 || p.status_interval_ms == 0 {
            return Err(RelayError::Config("progress intervals must be > 0".into()));
        }
        if p.interval_growth < 1.0 || p.max_interval_multiplier < 1.0 {
            return Err(RelayError::Config(
                "progress interval growth and multiplier must be >= 1.0".into(),
            ));
        }
        if self.format.max_message_length < 16 {
            return Err(RelayError::Config(
                "format.max_message_length must be >= 16".into(),
            ));
        }
        Ok(())
    }
}

/// Overwrite `target` with the parsed value of `key` when it is set and parses.
fn override_parsed<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(v) = val.parse() {
            *target = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.global_capacity, 30);
        assert_eq!(config.rate_limit.chat_window_ms, 60_000);
        assert_eq!(config.format.max_message_length, 4_096);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"retry":{"max_retries":5},"queue":{"drop_policy":"reject"}}"#)
                .unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay_ms, 1_000);
        assert_eq!(config.queue.drop_policy, crate::bus::DropPolicy::Reject);
        assert_eq!(config.queue.capacity, 100);
    }

    #[test]
    fn test_load_from_missing_path_returns_defaults() {
        let config =
            Config::load_from_path(Path::new("/nonexistent/zeptorelay/config.json")).unwrap();
        assert_eq!(config.dedup.capacity, 1_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dedup":{{"ttl_ms":250}}}}"#).unwrap();
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.dedup.ttl_ms, 250);
    }

    #[test]
    fn test_load_invalid_json_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, RelayError::Json(_)));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = Config::default();
        config.rate_limit.chat_capacity = 0;
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));

        let mut config = Config::default();
        config.queue.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_retry_delays() {
        let mut config = Config::default();
        config.retry.initial_delay_ms = 60_000;
        config.retry.max_delay_ms = 1_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_deserialize() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format":"json","level":"debug"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert_eq!(cfg.level, "debug");

        let cfg: LoggingConfig = serde_json::from_str(r#"{"level":"trace"}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Component);
        assert!(cfg.file.is_none());
    }
}
