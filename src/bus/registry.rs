//! Conversation stream registry.
//!
//! Maps a conversation id to one persistent, ordered input stream. The agent
//! obtains a [`StreamHandle`] once and keeps pulling from it until the stream is
//! aborted; producers push with [`StreamRegistry::add_message`] and are never
//! coupled to the agent's lifecycle (a missing or dead stream is a silent no-op).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::{BoundedQueue, DropPolicy, QueueStats};
use crate::error::RelayError;

struct ConversationStream<T> {
    queue: Arc<BoundedQueue<T>>,
    cancel: CancellationToken,
}

impl<T: Send> ConversationStream<T> {
    fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            queue: Arc::new(BoundedQueue::new(capacity, policy)),
            cancel: CancellationToken::new(),
        }
    }

    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.queue.is_closed()
    }

    fn teardown(&self) {
        self.cancel.cancel();
        self.queue.clear();
        self.queue.close();
    }

    fn handle(&self, chat_id: &str) -> StreamHandle<T> {
        StreamHandle {
            chat_id: chat_id.to_string(),
            queue: Arc::clone(&self.queue),
            cancel: self.cancel.clone(),
        }
    }
}

/// Consumer side of a conversation stream.
///
/// Cloneable and restartable: obtaining it once is enough for an agent loop to
/// consume indefinitely. [`next`](Self::next) returns `None` only after the
/// stream was aborted or ended and drained.
pub struct StreamHandle<T> {
    chat_id: String,
    queue: Arc<BoundedQueue<T>>,
    cancel: CancellationToken,
}

impl<T> Clone for StreamHandle<T> {
    fn clone(&self) -> Self {
        Self {
            chat_id: self.chat_id.clone(),
            queue: Arc::clone(&self.queue),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: Send + 'static> StreamHandle<T> {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Wait for the next item.
    pub async fn next(&self) -> Option<T> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = self.queue.dequeue() => match result {
                    Ok(item) => return Some(item),
                    // Cleared underneath us; the stream itself is still alive.
                    Err(RelayError::QueueCleared) => continue,
                    Err(_) => return None,
                },
            }
        }
    }

    /// True until the stream is aborted or ended.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.queue.is_closed()
    }

    /// Token cancelled when the stream is aborted; lets the agent stop in-flight work.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Adapt the handle into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures::stream::unfold(self, |handle| async move {
            let item = handle.next().await?;
            Some((item, handle))
        })
    }
}

/// Registry of per-conversation input streams. At most one live stream per key.
pub struct StreamRegistry<T> {
    capacity: usize,
    policy: DropPolicy,
    streams: Mutex<HashMap<String, ConversationStream<T>>>,
}

impl<T: Send + 'static> StreamRegistry<T> {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            capacity,
            policy,
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Return the live stream for `chat_id`, creating one if needed.
    pub fn get_or_create(&self, chat_id: &str) -> StreamHandle<T> {
        let mut streams = self.streams.lock().unwrap();
        if let Some(existing) = streams.get(chat_id) {
            if existing.is_active() {
                return existing.handle(chat_id);
            }
            existing.teardown();
        }
        let stream = ConversationStream::new(self.capacity, self.policy);
        let handle = stream.handle(chat_id);
        streams.insert(chat_id.to_string(), stream);
        debug!(chat_id = %chat_id, "Conversation stream created");
        handle
    }

    /// Start a fresh stream for `chat_id`, tearing down any previous one first.
    pub fn start(&self, chat_id: &str) -> StreamHandle<T> {
        let mut streams = self.streams.lock().unwrap();
        if let Some(previous) = streams.remove(chat_id) {
            previous.teardown();
            info!(chat_id = %chat_id, "Replaced existing conversation stream");
        }
        let stream = ConversationStream::new(self.capacity, self.policy);
        let handle = stream.handle(chat_id);
        streams.insert(chat_id.to_string(), stream);
        handle
    }

    /// Push an item into the conversation's stream.
    ///
    /// Returns whether the item was accepted. Never fails: a missing, cancelled
    /// or closed stream, or a full queue, only produces a diagnostic log.
    pub fn add_message(&self, chat_id: &str, item: T) -> bool {
        let streams = self.streams.lock().unwrap();
        let Some(stream) = streams.get(chat_id) else {
            debug!(chat_id = %chat_id, "No conversation stream, dropping item");
            return false;
        };
        if !stream.is_active() {
            debug!(chat_id = %chat_id, "Conversation stream inactive, dropping item");
            return false;
        }
        match stream.queue.enqueue(item) {
            Ok(true) => true,
            Ok(false) => {
                debug!(chat_id = %chat_id, "Conversation queue full, item discarded");
                false
            }
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Failed to enqueue conversation item");
                false
            }
        }
    }

    /// Cancel and close the stream, evicting it. Returns whether one existed.
    pub fn abort(&self, chat_id: &str) -> bool {
        let removed = self.streams.lock().unwrap().remove(chat_id);
        match removed {
            Some(stream) => {
                stream.teardown();
                info!(chat_id = %chat_id, "Conversation stream aborted");
                true
            }
            None => false,
        }
    }

    /// Close the stream gracefully: the consumer drains buffered items, then sees the end.
    pub fn end(&self, chat_id: &str) -> bool {
        let removed = self.streams.lock().unwrap().remove(chat_id);
        match removed {
            Some(stream) => {
                stream.queue.close();
                debug!(chat_id = %chat_id, "Conversation stream ended");
                true
            }
            None => false,
        }
    }

    /// True iff a stream exists and is neither cancelled nor closed.
    pub fn is_active(&self, chat_id: &str) -> bool {
        self.streams
            .lock()
            .unwrap()
            .get(chat_id)
            .is_some_and(|s| s.is_active())
    }

    pub fn stats(&self, chat_id: &str) -> Option<QueueStats> {
        self.streams
            .lock()
            .unwrap()
            .get(chat_id)
            .map(|s| s.queue.stats())
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.streams.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of items dropped across all live queues.
    pub fn total_dropped(&self) -> u64 {
        self.streams
            .lock()
            .unwrap()
            .values()
            .map(|s| s.queue.dropped())
            .sum()
    }

    /// Highest queue utilization across live streams.
    pub fn peak_utilization(&self) -> f64 {
        self.streams
            .lock()
            .unwrap()
            .values()
            .map(|s| s.queue.utilization())
            .fold(0.0, f64::max)
    }

    /// Abort every stream. Returns how many were torn down.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<_> = self.streams.lock().unwrap().drain().collect();
        for (_, stream) in &drained {
            stream.teardown();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Conversation streams shut down");
        }
        drained.len()
    }
}
