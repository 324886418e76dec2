//! Change notification for the record store.
//!
//! Each subscriber owns a bounded [`WatchQueue`]. Producers never block:
//! when a queue is full the oldest pending event is discarded and counted.
//! A subscription ends when its cancellation token fires or its stream is
//! dropped, whichever comes first, and is removed from the hub either way.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Stream of change events returned by [`crate::store::ClusterStore::watch`].
pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    /// The record was created or overwritten.
    Put,
    /// The record was hard-deleted.
    Delete,
    /// Changes may have been missed; re-read every record.
    Resync,
}

/// One change to the store. Consumers fetch the record itself with `get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub name: String,
    pub kind: WatchEventKind,
    /// Generation of the record after a put, or the last one seen before a
    /// delete.
    pub generation: i64,
}

impl WatchEvent {
    pub fn put(name: impl Into<String>, generation: i64) -> Self {
        Self {
            name: name.into(),
            kind: WatchEventKind::Put,
            generation,
        }
    }

    pub fn delete(name: impl Into<String>, generation: i64) -> Self {
        Self {
            name: name.into(),
            kind: WatchEventKind::Delete,
            generation,
        }
    }

    /// Marker for a gap in the feed. Carries no record.
    pub fn resync() -> Self {
        Self {
            name: String::new(),
            kind: WatchEventKind::Resync,
            generation: 0,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding one of these locks cannot leave the queue in a
    // torn state, so keep going with the inner value.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Bounded per-subscriber queue with drop-oldest overflow.
#[derive(Debug)]
pub struct WatchQueue {
    events: Mutex<VecDeque<WatchEvent>>,
    capacity: usize,
    dropped: AtomicU64,
    gaps: AtomicU64,
    notify: Notify,
}

impl WatchQueue {
    /// Create a queue holding at most `capacity` events. A capacity of zero
    /// is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
            gaps: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Enqueue an event, discarding the oldest one if the queue is full.
    pub fn push(&self, event: WatchEvent) {
        {
            let mut events = lock(&self.events);
            if events.len() >= self.capacity {
                if let Some(lost) = events.pop_front() {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::debug!(
                        cluster = %lost.name,
                        dropped = total,
                        "watch queue full, dropped oldest event"
                    );
                }
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Record that the feed lost events upstream and tell the consumer with
    /// a [`WatchEventKind::Resync`] event.
    pub fn mark_gap(&self) {
        self.gaps.fetch_add(1, Ordering::Relaxed);
        self.push(WatchEvent::resync());
    }

    fn pop(&self) -> Option<WatchEvent> {
        lock(&self.events).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of upstream gaps reported with [`WatchQueue::mark_gap`].
    pub fn gaps(&self) -> u64 {
        self.gaps.load(Ordering::Relaxed)
    }
}

/// Turn a queue into a stream that ends once `token` is cancelled.
///
/// Dropping the stream cancels `token`, so whoever feeds the queue can use
/// the same token to learn that the consumer is gone.
pub fn subscription_stream(queue: Arc<WatchQueue>, token: CancellationToken) -> WatchStream {
    let guard = token.clone().drop_guard();
    Box::pin(async_stream::stream! {
        let _guard = guard;
        loop {
            if token.is_cancelled() {
                break;
            }
            if let Some(event) = queue.pop() {
                yield event;
                continue;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = queue.notify.notified() => {}
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// In-process fan-out to every live subscriber queue.
#[derive(Debug, Default)]
pub struct WatchHub {
    subscribers: Mutex<Vec<Arc<WatchQueue>>>,
}

impl WatchHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver `event` to every subscriber. Never blocks on consumers.
    pub fn publish(&self, event: WatchEvent) {
        let subscribers = lock(&self.subscribers);
        for queue in subscribers.iter() {
            queue.push(event.clone());
        }
    }

    /// Register a new subscriber.
    ///
    /// The subscriber is removed as soon as `cancel` fires or the returned
    /// stream is dropped, even if the consumer never polls it again. Must be
    /// called from within a tokio runtime.
    pub fn subscribe(self: &Arc<Self>, cancel: &CancellationToken, buffer: usize) -> WatchStream {
        let token = cancel.child_token();
        let queue = Arc::new(WatchQueue::new(buffer));
        lock(&self.subscribers).push(Arc::clone(&queue));

        let hub: Weak<Self> = Arc::downgrade(self);
        let registered = Arc::clone(&queue);
        let released = token.clone();
        tokio::spawn(async move {
            released.cancelled().await;
            if let Some(hub) = hub.upgrade() {
                hub.remove(&registered);
            }
        });

        subscription_stream(queue, token)
    }

    fn remove(&self, queue: &Arc<WatchQueue>) {
        lock(&self.subscribers).retain(|q| !Arc::ptr_eq(q, queue));
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
