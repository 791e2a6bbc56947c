//! Fan-out of [`StatusUpdate`]s to live subscribers.
//!
//! Every subscriber owns a bounded mpsc buffer. Publishing uses `try_send`,
//! so a slow consumer loses updates instead of stalling the executor. The
//! history ledger stays the durable record; this feed is best-effort.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::types::{ExecutionId, JobId, StatusUpdate, UpdateKind};

pub type SubscriberId = u64;

pub struct EventBus {
    buffer: usize,
    next_id: AtomicU64,
    /// Registry is sharded; subscribe/unsubscribe never wait on a publisher.
    subscribers: DashMap<SubscriberId, mpsc::Sender<StatusUpdate>>,
    /// Serialises stamping + delivery so every subscriber sees one global
    /// order with non-decreasing timestamps.
    last_stamp: Mutex<DateTime<Utc>>,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            next_id: AtomicU64::new(1),
            subscribers: DashMap::new(),
            last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber. Dropping the returned handle deregisters it.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers.insert(id, tx);
        debug!(subscriber = id, "event subscriber registered");
        Subscription {
            id,
            rx,
            bus: Arc::clone(self),
        }
    }

    /// Deregister a subscriber and release its buffer.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    fn remove(&self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscriber = id, "event subscriber removed");
        }
    }

    /// Build a timestamped update and deliver a copy to every subscriber.
    pub fn publish(
        &self,
        job_id: &JobId,
        execution_id: ExecutionId,
        status: UpdateKind,
        message: impl Into<String>,
    ) -> StatusUpdate {
        let mut last = self.last_stamp.lock();
        let timestamp = Utc::now().max(*last);
        *last = timestamp;

        let update = StatusUpdate {
            job_id: job_id.clone(),
            execution_id,
            status,
            message: message.into(),
            timestamp,
        };

        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(update.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscriber = *entry.key(),
                        job_id = %job_id,
                        "subscriber buffer full, update dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        drop(last);

        // Removal takes a shard write lock, so it must wait until iteration ends.
        for id in closed {
            self.remove(id);
        }
        update
    }

    /// Drop every subscriber; their streams end once the buffers drain.
    pub fn close_all(&self) {
        let count = self.subscribers.len();
        self.subscribers.clear();
        if count > 0 {
            debug!(count, "closed all event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total updates dropped because a subscriber's buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving side of a subscription.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<StatusUpdate>,
    bus: Arc<EventBus>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next update. `None` once the bus has closed this subscriber.
    pub async fn recv(&mut self) -> Option<StatusUpdate> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<StatusUpdate> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(self.id);
    }
}
