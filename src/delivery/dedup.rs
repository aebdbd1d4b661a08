//! Short-window suppression of duplicate outbound sends.
//!
//! Agents sometimes emit the same text twice in quick succession (a retried
//! turn, a repeated summary). Keys are a SHA-256 of chat id plus content, kept
//! in a bounded map whose entries expire after a TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use crate::config::DedupConfig;

/// Time-expiring, capacity-bounded content-hash cache.
pub struct Deduplicator {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
}

impl Deduplicator {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(Duration::from_millis(config.ttl_ms), config.capacity)
    }

    /// Cache key for a (chat, content) pair.
    pub fn key(chat_id: &str, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(chat_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns `true` if the same content was sent to this chat within the
    /// TTL (suppress it). Otherwise records it and returns `false`.
    pub fn check_and_mark(&self, chat_id: &str, content: &str) -> bool {
        let key = Self::key(chat_id, content);
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        if let Some(&seen) = entries.get(&key) {
            if now.saturating_duration_since(seen) < self.ttl {
                debug!(chat_id = %chat_id, "Duplicate send suppressed");
                return true;
            }
        }

        let ttl = self.ttl;
        entries.retain(|_, seen| now.saturating_duration_since(*seen) < ttl);

        if entries.len() >= self.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, t)| **t)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(key, now);
        false
    }

    /// Remove expired entries; returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, seen| now.saturating_duration_since(*seen) < ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_within_ttl_then_expires() {
        let dedup = Deduplicator::new(Duration::from_secs(5), 100);
        assert!(!dedup.check_and_mark("chat", "hi"));
        assert!(dedup.check_and_mark("chat", "hi"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!dedup.check_and_mark("chat", "hi"));
    }

    #[test]
    fn test_chats_are_independent() {
        let dedup = Deduplicator::new(Duration::from_secs(60), 100);
        assert!(!dedup.check_and_mark("a", "hi"));
        assert!(!dedup.check_and_mark("b", "hi"));
        assert!(!dedup.check_and_mark("a", "hello"));
        assert_eq!(dedup.len(), 3);
    }

    #[test]
    fn test_key_separates_chat_from_content() {
        assert_ne!(Deduplicator::key("ab", "c"), Deduplicator::key("a", "bc"));
        assert_eq!(Deduplicator::key("a", "b").len(), 64);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dedup = Deduplicator::new(Duration::from_secs(60), 2);
        assert!(!dedup.check_and_mark("c", "1"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!dedup.check_and_mark("c", "2"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(!dedup.check_and_mark("c", "3"));
        assert_eq!(dedup.len(), 2);
        // "1" was evicted, so it is new again.
        assert!(!dedup.check_and_mark("c", "1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_expired() {
        let dedup = Deduplicator::new(Duration::from_millis(100), 10);
        dedup.check_and_mark("c", "x");
        dedup.check_and_mark("c", "y");
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(dedup.cleanup_expired(), 2);
        assert!(dedup.is_empty());
    }
}
