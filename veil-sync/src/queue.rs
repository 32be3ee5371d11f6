//! FIFO hand-off lock serializing every mutation of one document.
//!
//! ```text
//!   holder ──► [ placeholder | waiter₁ | waiter₂ ]
//!                   │ release: pop own entry, wake waiter₁
//!                   ▼
//!   waiter₁ ──► [ waiter₁ | waiter₂ ]
//! ```
//!
//! A caller that finds the queue empty enqueues a placeholder and proceeds.
//! Otherwise it enqueues a continuation and suspends until the previous
//! holder invokes it. Release never drains the queue: each holder wakes
//! exactly the next waiter. Local edits and inbound batches both go through
//! the same queue, so they form one totally ordered stream per document.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

/// Resumes a suspended waiter.
pub type Continuation = oneshot::Sender<()>;

/// Per-document change queue.
#[derive(Debug, Default)]
pub struct ChangeQueue {
    entries: Mutex<VecDeque<Option<Continuation>>>,
}

impl ChangeQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append an entry (`None` for a placeholder) and return the new length.
    pub fn enqueue(&self, entry: Option<Continuation>) -> usize {
        let mut entries = self.entries();
        entries.push_back(entry);
        entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Wait for this caller's turn. The returned slot releases on drop.
    pub async fn acquire(self: &Arc<Self>) -> QueueSlot {
        let rx = {
            let mut entries = self.entries();
            if entries.is_empty() {
                entries.push_back(None);
                None
            } else {
                let (tx, rx) = oneshot::channel();
                entries.push_back(Some(tx));
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            let mut waiter = Waiter {
                queue: Arc::clone(self),
                rx: Some(rx),
            };
            if let Some(rx) = waiter.rx.as_mut() {
                // An error means the queue itself was torn down; proceed.
                let _ = rx.await;
            }
            waiter.rx = None;
        }

        QueueSlot {
            queue: Arc::clone(self),
        }
    }

    /// Pop the holder's entry and wake the next live waiter.
    fn release(&self) {
        let mut entries = self.entries();
        entries.pop_front();
        while let Some(front) = entries.front_mut() {
            match front.take() {
                Some(next) => {
                    if next.send(()).is_ok() {
                        return;
                    }
                    // Waiter gave up before its turn.
                    entries.pop_front();
                }
                None => return,
            }
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<Option<Continuation>>> {
        // A panic inside the critical section cannot leave the deque torn.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exclusive right to mutate the document; released when dropped.
#[must_use = "the slot is released as soon as it is dropped"]
#[derive(Debug)]
pub struct QueueSlot {
    queue: Arc<ChangeQueue>,
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        self.queue.release();
    }
}

/// Suspended acquire. If the future is dropped after its turn was granted
/// but before it resumed, the turn is passed on here.
struct Waiter {
    queue: Arc<ChangeQueue>,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            // After close, a release either already handed us the turn or
            // will see the send fail and skip this entry.
            rx.close();
            if rx.try_recv().is_ok() {
                self.queue.release();
            }
        }
    }
}
