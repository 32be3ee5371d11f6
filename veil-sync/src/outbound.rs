//! Outbound pipeline: pending changes → push jobs.
//!
//! ```text
//!  pending ──► per-destination batches (≤ max_batch_ops) ──► Batch jobs
//!     │
//!     └─ compressed ≥ inline_threshold ──► InsertThenUpload (marker + blob)
//! ```
//!
//! Name items ride in the batches as creator-only writes. Content changes
//! already confirmed on the server are skipped. The pending list is emptied
//! by every push whether or not the writes later succeed: hand-off to the
//! push worker is the end of this pipeline's responsibility.

use std::collections::HashSet;

use veil_core::NAME_ITEM_ID;

use crate::compression;
use crate::config::SyncConfig;
use crate::document::Document;
use crate::remote::{ItemBody, Scope, WriteCommand, WriteOp};
use crate::retry::{PushJob, PushWorker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundKind {
    /// Raw, uncompressed change bytes.
    Change(Vec<u8>),
    Name { name: String, command: WriteCommand },
}

/// A change waiting for the next push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundChange {
    pub scope: Scope,
    pub item_id: String,
    pub kind: OutboundKind,
}

impl OutboundChange {
    pub fn change(scope: Scope, item_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            scope,
            item_id: item_id.into(),
            kind: OutboundKind::Change(payload),
        }
    }

    pub fn name(scope: Scope, name: impl Into<String>, command: WriteCommand) -> Self {
        Self {
            scope,
            item_id: NAME_ITEM_ID.to_string(),
            kind: OutboundKind::Name {
                name: name.into(),
                command,
            },
        }
    }
}

/// How a compressed change travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Inline,
    Blob,
}

pub fn route(compressed_len: usize, inline_threshold: usize) -> Route {
    if compressed_len < inline_threshold {
        Route::Inline
    } else {
        Route::Blob
    }
}

/// Build the push jobs for `pending`, in order of first appearance of each
/// destination.
pub fn plan_push(
    pending: Vec<OutboundChange>,
    stored_on_server: &HashSet<String>,
    config: &SyncConfig,
) -> Vec<PushJob> {
    let max_ops = config.max_batch_ops.max(1);
    let mut jobs = Vec::new();
    let mut batches: Vec<(Scope, Vec<WriteOp>)> = Vec::new();

    for change in pending {
        let op = match change.kind {
            OutboundKind::Name { name, command } => WriteOp {
                command,
                item_id: change.item_id,
                body: ItemBody::Name(name),
                access: Default::default(),
            }
            .creator_only(),
            OutboundKind::Change(payload) => {
                if stored_on_server.contains(&change.item_id) {
                    continue;
                }
                let compressed = compression::compress(&payload);
                match route(compressed.len(), config.inline_threshold) {
                    Route::Inline => {
                        WriteOp::insert(change.item_id, ItemBody::Compressed(compressed))
                            .creator_only()
                    }
                    Route::Blob => {
                        log::debug!(
                            "Change {} is {} bytes compressed, uploading as blob",
                            change.item_id,
                            compressed.len()
                        );
                        jobs.push(PushJob::InsertThenUpload {
                            scope: change.scope,
                            op: WriteOp::insert(change.item_id, ItemBody::StoredAsFile)
                                .creator_only(),
                            blob: compressed,
                        });
                        continue;
                    }
                }
            }
        };

        let index = match batches.iter().position(|(scope, _)| *scope == change.scope) {
            Some(index) => index,
            None => {
                batches.push((change.scope, Vec::new()));
                batches.len() - 1
            }
        };
        let (scope, ops) = &mut batches[index];
        ops.push(op);
        if ops.len() >= max_ops {
            jobs.push(PushJob::Batch {
                scope: scope.clone(),
                ops: std::mem::take(ops),
            });
        }
    }

    jobs.extend(
        batches
            .into_iter()
            .filter(|(_, ops)| !ops.is_empty())
            .map(|(scope, ops)| PushJob::Batch { scope, ops }),
    );
    jobs
}

/// Hand every pending change of `doc` to `worker`. Returns the number of
/// jobs submitted.
pub async fn push_server_changes(doc: &Document, worker: &PushWorker) -> usize {
    let (pending, stored_on_server) = {
        let mut state = doc.state.lock().await;
        if state.pending.is_empty() {
            return 0;
        }
        (
            std::mem::take(&mut state.pending),
            state.stored_on_server.clone(),
        )
    };

    let jobs = plan_push(pending, &stored_on_server, &doc.config);
    let count = jobs.len();
    for job in jobs {
        worker.submit(job);
    }
    if count > 0 {
        log::debug!("Pushed {count} jobs for {}", doc.label());
    }
    count
}
