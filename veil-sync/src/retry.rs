//! Push worker: runs outbound network writes with fixed-delay retry.
//!
//! ```text
//!  plan_push ──submit──► [ job queue ] ──► worker ──► RemoteStore
//!                             ▲              │
//!                             │  transient   │
//!                             └── sleep(retry_delay) ◄─┘
//! ```
//!
//! Jobs run one at a time in submission order. A job that fails with a
//! transient error is re-submitted after `retry_delay`; anything else is
//! abandoned and logged. Every pending job and scheduled retry dies with the
//! worker's cancellation token.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::SyncConfig;
use crate::remote::{RemoteError, RemoteStore, Scope, WriteOp};

/// One outbound network write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushJob {
    /// Atomic transaction of up to `max_batch_ops` writes.
    Batch { scope: Scope, ops: Vec<WriteOp> },
    /// Single item write.
    Item { scope: Scope, op: WriteOp },
    /// Marker item write followed by its blob upload. The upload runs even
    /// when the write fails permanently: once referenced, the blob must exist.
    InsertThenUpload {
        scope: Scope,
        op: WriteOp,
        blob: Vec<u8>,
    },
    Upload {
        scope: Scope,
        item_id: String,
        blob: Vec<u8>,
    },
}

impl PushJob {
    fn label(&self) -> &'static str {
        match self {
            PushJob::Batch { .. } => "batch",
            PushJob::Item { .. } => "item",
            PushJob::InsertThenUpload { .. } => "insert-then-upload",
            PushJob::Upload { .. } => "upload",
        }
    }
}

/// Counters of finished work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushStats {
    pub completed: u64,
    pub retried: u64,
    pub abandoned: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
    in_flight: AtomicUsize,
}

struct Attempt {
    job: PushJob,
    attempt: u32,
}

enum Outcome {
    Done,
    /// Succeeded, with a job to run next.
    Continue(PushJob),
    Failed(RemoteError),
}

/// Handle to a running push worker. Dropping it stops the worker.
pub struct PushWorker {
    tx: mpsc::UnboundedSender<Attempt>,
    counters: Arc<Counters>,
    _stop: DropGuard,
}

impl PushWorker {
    /// Spawn a worker writing to `remote` until `cancel` fires.
    pub fn spawn(
        remote: Arc<dyn RemoteStore>,
        config: &SyncConfig,
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());

        let runner = Runner {
            remote,
            retry_delay: config.retry_delay,
            retry_budget: config.retry_budget,
            tx: tx.clone(),
            counters: counters.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(runner.run(rx));

        Self {
            tx,
            counters,
            _stop: cancel.drop_guard(),
        }
    }

    pub fn submit(&self, job: PushJob) {
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Attempt { job, attempt: 0 }).is_err() {
            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
            log::debug!("Push worker stopped, job dropped");
        }
    }

    /// Jobs submitted and not yet completed or abandoned, retries included.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PushStats {
        PushStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }
}

struct Runner {
    remote: Arc<dyn RemoteStore>,
    retry_delay: Duration,
    retry_budget: Option<u32>,
    tx: mpsc::UnboundedSender<Attempt>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
}

impl Runner {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Attempt>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                next = rx.recv() => {
                    let Some(attempt) = next else { break };
                    self.execute(attempt).await;
                }
            }
        }
        log::debug!("Push worker stopped");
    }

    async fn execute(&self, Attempt { job, attempt }: Attempt) {
        match self.attempt(&job).await {
            Outcome::Done => self.finish(),
            Outcome::Continue(next) => {
                // The follow-up inherits this job's in-flight slot.
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                let _ = self.tx.send(Attempt {
                    job: next,
                    attempt: 0,
                });
            }
            Outcome::Failed(err) if err.is_transient() => self.retry(job, attempt, err),
            Outcome::Failed(err) => match job {
                PushJob::InsertThenUpload { scope, op, blob } => {
                    log::warn!("Marker write for {} failed ({err}), uploading blob anyway", op.item_id);
                    let _ = self.tx.send(Attempt {
                        job: PushJob::Upload {
                            scope,
                            item_id: op.item_id,
                            blob,
                        },
                        attempt: 0,
                    });
                }
                job => {
                    log::warn!("Abandoning {} push: {err}", job.label());
                    self.abandon();
                }
            },
        }
    }

    async fn attempt(&self, job: &PushJob) -> Outcome {
        let result = match job {
            PushJob::Batch { scope, ops } => self.remote.write_batch(scope, ops.clone()).await,
            PushJob::Item { scope, op } => self.remote.write_item(scope, op.clone()).await,
            PushJob::InsertThenUpload { scope, op, blob } => {
                return match self.remote.write_item(scope, op.clone()).await {
                    Ok(()) => Outcome::Continue(PushJob::Upload {
                        scope: scope.clone(),
                        item_id: op.item_id.clone(),
                        blob: blob.clone(),
                    }),
                    Err(e) => Outcome::Failed(e),
                };
            }
            PushJob::Upload {
                scope,
                item_id,
                blob,
            } => self.remote.upload_blob(scope, item_id, blob.clone()).await,
        };
        match result {
            Ok(()) => Outcome::Done,
            Err(e) => Outcome::Failed(e),
        }
    }

    fn retry(&self, job: PushJob, attempt: u32, err: RemoteError) {
        let attempt = attempt + 1;
        if self.retry_budget.is_some_and(|budget| attempt >= budget) {
            log::error!("Giving up {} push after {attempt} attempts: {err}", job.label());
            self.abandon();
            return;
        }
        log::debug!("Retrying {} push in {:?}: {err}", job.label(), self.retry_delay);
        self.counters.retried.fetch_add(1, Ordering::Relaxed);

        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(Attempt { job, attempt });
                }
            }
        });
    }

    fn finish(&self) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn abandon(&self) {
        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
