//! Bounded hand-off buffer with an overwrite-oldest overflow policy
//!
//! Producers never block: a `put` on a full channel evicts the oldest item and
//! inserts the new one inside a single critical section. Consumers suspend in
//! `take` until an item is available, so stale data is always preferred over
//! no data and memory stays bounded at `capacity` items.
//!
//! Reads are destructive. When several consumers share one channel they race
//! for items and each item is delivered to exactly one of them.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// Default capacity of both pipeline channels
pub const DEFAULT_CAPACITY: usize = 3;

/// Result of a single `put`
#[derive(Debug, PartialEq, Eq)]
pub enum PutOutcome<T> {
    /// Item stored without eviction
    Stored,
    /// Item stored; the returned oldest item was evicted to make room
    Evicted(T),
    /// Channel is closed; the item was dropped
    Closed(T),
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Fixed-capacity FIFO with overwrite-oldest semantics
pub struct BoundedChannel<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    available: Notify,

    // Statistics
    puts: AtomicU64,
    evictions: AtomicU64,
    takes: AtomicU64,
}

impl<T> BoundedChannel<T> {
    /// Creates an empty channel.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "channel capacity must be at least 1");

        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            available: Notify::new(),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            takes: AtomicU64::new(0),
        }
    }

    /// Inserts `item`, evicting the oldest item first if the channel is full.
    ///
    /// Never blocks on consumers.
    pub fn put(&self, item: T) -> PutOutcome<T> {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PutOutcome::Closed(item);
            }

            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(item);

            match evicted {
                Some(old) => PutOutcome::Evicted(old),
                None => PutOutcome::Stored,
            }
        };

        self.puts.fetch_add(1, Ordering::Relaxed);
        if matches!(outcome, PutOutcome::Evicted(_)) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.available.notify_one();

        outcome
    }

    /// Removes and returns the oldest item, waiting until one is available.
    ///
    /// Returns `None` only once the channel is closed and drained.
    pub async fn take(&self) -> Option<T> {
        loop {
            // Register interest before checking so a put between the check and
            // the await cannot be missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    let more = !inner.items.is_empty();
                    drop(inner);
                    self.takes.fetch_add(1, Ordering::Relaxed);
                    if more {
                        // Pass the wakeup on so another waiting consumer sees the rest
                        self.available.notify_one();
                    }
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`.
    ///
    /// Returns `Err(TakeTimeout)` when nothing arrived in time and `Ok(None)`
    /// when the channel was closed.
    pub async fn take_timeout(&self, timeout: Duration) -> Result<Option<T>, TakeTimeout> {
        tokio::time::timeout(timeout, self.take())
            .await
            .map_err(|_| TakeTimeout(timeout))
    }

    /// Removes the oldest item without waiting
    pub fn try_take(&self) -> Option<T> {
        let item = self.inner.lock().items.pop_front();
        if item.is_some() {
            self.takes.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Marks the channel as finished.
    ///
    /// Buffered items can still be taken; afterwards `take` returns `None`.
    /// Subsequent puts are dropped.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Gets channel statistics
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            capacity: self.capacity,
            buffered: self.len(),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            takes: self.takes.load(Ordering::Relaxed),
        }
    }
}

impl<T: Clone> BoundedChannel<T> {
    /// Copies the buffered items, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.inner.lock().items.iter().cloned().collect()
    }
}

impl<T> std::fmt::Debug for BoundedChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedChannel")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Elapsed wait in [`BoundedChannel::take_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no item available within {0:?}")]
pub struct TakeTimeout(pub Duration);

/// Counters for one channel
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ChannelStats {
    pub capacity: usize,
    pub buffered: usize,
    pub puts: u64,
    pub evictions: u64,
    pub takes: u64,
}
