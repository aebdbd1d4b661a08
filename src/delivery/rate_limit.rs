//! Dual-level token-bucket rate limiter.
//!
//! One global bucket caps total outbound calls (Telegram: ~30/s with a small
//! burst); one lazily created bucket per chat caps calls into a single chat
//! (~20/min for groups). [`RateLimiter::throttle`] passes the global gate,
//! then the chat gate, then runs the operation.
//!
//! The two gates are taken one after the other, not reserved jointly. A caller
//! that wins a global token and then waits on its chat bucket does not hold
//! back other chats, which may take further global tokens meanwhile.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// A refilling count of permitted operations.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: u32,
    capacity: u32,
    burst: u32,
    window: Duration,
    last_refill: Instant,
    last_used: Instant,
}

impl TokenBucket {
    /// A full bucket: `capacity` tokens per `window`, refilling up to
    /// `capacity + burst`.
    pub fn new(capacity: u32, window: Duration, burst: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity,
            capacity: capacity.max(1),
            burst,
            window,
            last_refill: now,
            last_used: now,
        }
    }

    /// Add whole tokens for the time elapsed since the last refill.
    ///
    /// `last_refill` only advances when at least one token was added, so
    /// frequent polling never loses fractional progress.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let window = self.window.as_nanos();
        if window == 0 {
            self.tokens = self.max_tokens();
            self.last_refill = now;
            return;
        }
        let added = elapsed.as_nanos() * u128::from(self.capacity) / window;
        let added = u32::try_from(added).unwrap_or(u32::MAX);
        if added > 0 {
            self.tokens = self.tokens.saturating_add(added).min(self.max_tokens());
            self.last_refill = now;
        }
    }

    /// Refill, then take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_used = now;
        if self.tokens >= 1 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (after a lazy refill).
    pub fn available(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.tokens
    }

    /// Sleep between polls while empty: one token's worth of window,
    /// rounded up so a single poll always yields a whole token.
    pub fn poll_interval(&self) -> Duration {
        let nanos = self.window.as_nanos().div_ceil(u128::from(self.capacity));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn max_tokens(&self) -> u32 {
        self.capacity.saturating_add(self.burst)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }
}

/// Global + per-chat limiter.
pub struct RateLimiter {
    global: Mutex<TokenBucket>,
    chats: Mutex<HashMap<String, TokenBucket>>,
    chat_capacity: u32,
    chat_window: Duration,
    idle_eviction: Duration,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global: Mutex::new(TokenBucket::new(
                config.global_capacity,
                Duration::from_millis(config.global_window_ms),
                config.global_burst,
            )),
            chats: Mutex::new(HashMap::new()),
            chat_capacity: config.chat_capacity,
            chat_window: Duration::from_millis(config.chat_window_ms),
            idle_eviction: Duration::from_secs(config.idle_eviction_secs),
        }
    }

    /// Wait for a global token, then a token from `chat_id`'s bucket.
    pub async fn acquire(&self, chat_id: &str) {
        let mut waited = Duration::ZERO;

        loop {
            let pause = {
                let mut global = self.global.lock().unwrap();
                if global.try_acquire(Instant::now()) {
                    break;
                }
                global.poll_interval()
            };
            tokio::time::sleep(pause).await;
            waited += pause;
        }

        loop {
            let pause = {
                let mut chats = self.chats.lock().unwrap();
                let bucket = chats.entry(chat_id.to_string()).or_insert_with(|| {
                    TokenBucket::new(self.chat_capacity, self.chat_window, 0)
                });
                if bucket.try_acquire(Instant::now()) {
                    break;
                }
                bucket.poll_interval()
            };
            tokio::time::sleep(pause).await;
            waited += pause;
        }

        if !waited.is_zero() {
            debug!(
                chat_id = %chat_id,
                waited_ms = waited.as_millis() as u64,
                "Rate limiter delayed call"
            );
        }
    }

    /// Acquire send permission for `chat_id`, then run `op`.
    pub async fn throttle<T, F, Fut>(&self, chat_id: &str, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire(chat_id).await;
        op().await
    }

    /// Global tokens currently available.
    pub fn global_tokens(&self) -> u32 {
        self.global.lock().unwrap().available(Instant::now())
    }

    /// Tokens available in `chat_id`'s bucket, if it has one yet.
    pub fn chat_tokens(&self, chat_id: &str) -> Option<u32> {
        self.chats
            .lock()
            .unwrap()
            .get_mut(chat_id)
            .map(|b| b.available(Instant::now()))
    }

    /// Number of per-chat buckets being tracked.
    pub fn bucket_count(&self) -> usize {
        self.chats.lock().unwrap().len()
    }

    /// Drop chat buckets unused for longer than the idle window.
    /// Returns how many were evicted.
    pub fn cleanup_idle(&self) -> usize {
        let now = Instant::now();
        let mut chats = self.chats.lock().unwrap();
        let before = chats.len();
        chats.retain(|_, bucket| bucket.idle_for(now) < self.idle_eviction);
        let evicted = before - chats.len();
        if evicted > 0 {
            debug!(evicted, remaining = chats.len(), "Evicted idle chat buckets");
        }
        evicted
    }
}
