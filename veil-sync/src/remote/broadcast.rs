//! Fan-out of item batches to every subscriber of one database.
//!
//! Uses a tokio broadcast channel: one send reaches all subscribers, each
//! with an independent receiver buffering up to `capacity` batches. A
//! subscriber that falls further behind sees `Lagged` and must resync from
//! a fresh snapshot; items are idempotent on the receiving side, so a
//! resync never double-applies anything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use super::RemoteItem;

/// A batch shared between all receivers without copying.
pub type Batch = Arc<Vec<RemoteItem>>;

/// Statistics for monitoring fan-out health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub batches_sent: u64,
    pub items_sent: u64,
    pub subscribers: usize,
}

/// Per-database broadcast feed.
pub struct Feed {
    sender: broadcast::Sender<Batch>,
    capacity: usize,
    batches_sent: AtomicU64,
    items_sent: AtomicU64,
}

impl Feed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            batches_sent: AtomicU64::new(0),
            items_sent: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Batch> {
        self.sender.subscribe()
    }

    /// Send `items` to every current subscriber; returns how many received it.
    pub fn publish(&self, items: Vec<RemoteItem>) -> usize {
        if items.is_empty() {
            return 0;
        }
        let count = items.len() as u64;
        let receivers = self.sender.send(Arc::new(items)).unwrap_or(0);
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.items_sent.fetch_add(count, Ordering::Relaxed);
        receivers
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            items_sent: self.items_sent.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}
