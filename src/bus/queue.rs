//! Bounded async FIFO with suspension-based consumption.
//!
//! Producers never block: when the buffer is full the configured [`DropPolicy`]
//! decides what happens. Consumers suspend in [`BoundedQueue::dequeue`] until an
//! item arrives or the queue is cleared/closed, in which case they are released
//! with an error instead of hanging forever.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{RelayError, Result};

/// What to do with an incoming item when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Evict the head, then push the new item
    #[default]
    Oldest,
    /// Discard the incoming item; `enqueue` returns `Ok(false)`
    Newest,
    /// Fail with [`RelayError::QueueFull`]
    Reject,
}

/// Point-in-time view of a queue, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub waiting: usize,
    pub utilization: f64,
    pub closed: bool,
}

struct QueueState<T> {
    items: VecDeque<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
    closed: bool,
    dropped: u64,
}

impl<T> QueueState<T> {
    /// Hand `item` to the first live waiter, or give it back.
    fn hand_off(&mut self, mut item: T) -> Option<T> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(item) {
                Ok(()) => return None,
                // Receiver went away (consumer cancelled); try the next one.
                Err(back) => item = back,
            }
        }
        Some(item)
    }
}

/// Bounded FIFO queue shared between producers and one or more async consumers.
pub struct BoundedQueue<T> {
    capacity: usize,
    policy: DropPolicy,
    state: Mutex<QueueState<T>>,
}

impl<T: Send> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                waiters: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
        }
    }

    /// Push an item.
    ///
    /// Returns `Ok(true)` when accepted, `Ok(false)` when discarded under
    /// [`DropPolicy::Newest`]. Fails with `QueueFull` under [`DropPolicy::Reject`]
    /// and with `QueueClosed` once the queue has been closed.
    pub fn enqueue(&self, item: T) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(RelayError::QueueClosed);
        }

        let item = match state.hand_off(item) {
            None => return Ok(true),
            Some(item) => item,
        };

        if state.items.len() >= self.capacity {
            match self.policy {
                DropPolicy::Oldest => {
                    state.items.pop_front();
                    state.dropped += 1;
                    debug!(
                        capacity = self.capacity,
                        dropped = state.dropped,
                        "Queue full, evicted oldest item"
                    );
                }
                DropPolicy::Newest => {
                    state.dropped += 1;
                    debug!(
                        capacity = self.capacity,
                        dropped = state.dropped,
                        "Queue full, discarded incoming item"
                    );
                    return Ok(false);
                }
                DropPolicy::Reject => {
                    return Err(RelayError::QueueFull {
                        capacity: self.capacity,
                    });
                }
            }
        }

        state.items.push_back(item);
        Ok(true)
    }

    /// Take the next item, suspending until one is available.
    ///
    /// Buffered items are still returned after `close()`; once the buffer is
    /// empty a closed queue yields `QueueClosed`. A consumer suspended when
    /// `clear()` runs is released with `QueueCleared`.
    pub async fn dequeue(&self) -> Result<T> {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(RelayError::QueueClosed);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };

        let mut pending = PendingDequeue {
            queue: self,
            rx,
            finished: false,
        };
        let outcome = (&mut pending.rx).await;
        pending.finished = true;

        match outcome {
            Ok(item) => Ok(item),
            Err(_) if self.is_closed() => Err(RelayError::QueueClosed),
            Err(_) => Err(RelayError::QueueCleared),
        }
    }

    /// Non-suspending variant of [`dequeue`](Self::dequeue).
    pub fn try_dequeue(&self) -> Option<T> {
        self.state.lock().unwrap().items.pop_front()
    }

    /// Discard all buffered items and release every suspended consumer.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.items.clear();
        // Dropping the senders wakes each waiter with a receive error.
        state.waiters.clear();
    }

    /// Stop accepting items and release every suspended consumer.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.waiters.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> DropPolicy {
        self.policy
    }

    /// Total items discarded by the drop policy.
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    /// Fraction of capacity in use, `size / capacity`.
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().unwrap();
        QueueStats {
            size: state.items.len(),
            capacity: self.capacity,
            dropped: state.dropped,
            waiting: state.waiters.len(),
            utilization: state.items.len() as f64 / self.capacity as f64,
            closed: state.closed,
        }
    }

    /// Put back an item a cancelled consumer was handed but never observed.
    fn restore(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        if let Some(item) = state.hand_off(item) {
            if state.items.len() >= self.capacity {
                state.dropped += 1;
            } else {
                state.items.push_front(item);
            }
        }
    }
}

impl<T: Send> BoundedQueue<T> {
    /// Drop senders whose consumer has gone away.
    fn prune_waiters(&self) {
        let mut state = self.state.lock().unwrap();
        state.waiters.retain(|w| !w.is_closed());
    }
}

/// Guard for a suspended `dequeue`; recovers an in-flight item if the future is dropped.
struct PendingDequeue<'a, T: Send> {
    queue: &'a BoundedQueue<T>,
    rx: oneshot::Receiver<T>,
    finished: bool,
}

impl<T: Send> Drop for PendingDequeue<'_, T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.rx.close();
        if let Ok(item) = self.rx.try_recv() {
            self.queue.restore(item);
        }
        self.queue.prune_waiters();
    }
}
