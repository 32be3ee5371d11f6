//! Inbound pipeline: remote change items → replica.
//!
//! ```text
//!  batch ──► acquire queue slot
//!              │ for each item not yet applied:
//!              │   Compressed(bytes) ─► decompress ─────────────────┐
//!              │   StoredAsFile      ─► local cache │ fetch blob ───┤
//!              │                                                    ▼
//!              │                                   apply, mark applied, mirror
//!              ▼
//!           render editor, signal loaded, release slot
//! ```
//!
//! A change that fails to decompress or decode is skipped; the document
//! converges on everything else.

use veil_core::{Change, TextCrdt};

use crate::compression;
use crate::document::Document;
use crate::remote::{ItemBody, RemoteItem};

/// What happened to one inbound batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundReport {
    pub applied: usize,
    pub duplicates: usize,
    /// Blob markers whose blob is not uploaded yet; they come back with it.
    pub awaiting_blob: usize,
    pub skipped: usize,
}

enum Source {
    Inline,
    Cached,
    Fetched,
}

/// Apply a batch from the change stream under the document's change queue.
///
/// Blobs are fetched with the state lock released; the queue slot alone
/// keeps other mutations out meanwhile.
pub async fn handle_change_items(doc: &Document, items: Vec<RemoteItem>) -> InboundReport {
    let _slot = doc.queue.acquire().await;
    let mut report = InboundReport::default();
    if !doc.is_mounted() {
        return report;
    }

    let wanted: Vec<RemoteItem> = {
        let mut state = doc.state.lock().await;
        let mut wanted = Vec::with_capacity(items.len());
        for item in items {
            state.stored_on_server.insert(item.item_id.clone());
            if state.applied.contains(&item.item_id) {
                report.duplicates += 1;
            } else if !item.access.only_creator {
                log::warn!("Ignoring change {} writable by anyone", item.item_id);
                report.skipped += 1;
            } else {
                wanted.push(item);
            }
        }
        wanted
    };

    let mut resolved = Vec::with_capacity(wanted.len());
    for item in wanted {
        let (raw, source) = match &item.body {
            ItemBody::Compressed(bytes) => match compression::decompress(bytes) {
                Ok(raw) => (raw, Source::Inline),
                Err(e) => {
                    log::warn!("Skipping change {}: {e}", item.item_id);
                    report.skipped += 1;
                    continue;
                }
            },
            ItemBody::StoredAsFile if !item.blob => {
                report.awaiting_blob += 1;
                continue;
            }
            ItemBody::StoredAsFile => match doc.cached_change(&item.item_id) {
                Some(raw) => (raw, Source::Cached),
                None => match fetch_change(doc, &item.item_id).await {
                    Some(raw) => (raw, Source::Fetched),
                    None => {
                        report.skipped += 1;
                        continue;
                    }
                },
            },
            other => {
                log::warn!("Unexpected item {} in change stream: {other:?}", item.item_id);
                report.skipped += 1;
                continue;
            }
        };
        resolved.push((Change::with_id(item.item_id, raw), source));
    }

    let mut state = doc.state.lock().await;
    for (change, source) in resolved {
        // The same id may appear twice in one batch.
        if state.applied.contains(&change.id) {
            report.duplicates += 1;
            continue;
        }
        if matches!(source, Source::Fetched) {
            doc.mirror_change(&change);
        }
        if let Err(e) = state.replica.apply_changes(&[&change.payload]) {
            log::warn!("Skipping change {}: {e}", change.id);
            report.skipped += 1;
            continue;
        }
        if matches!(source, Source::Inline) {
            doc.mirror_change(&change);
        }
        state.applied.insert(change.id);
        report.applied += 1;
    }

    doc.render(&state);
    drop(state);
    doc.mark_changes_ready();

    log::debug!(
        "Change batch for {}: {} applied, {} duplicates, {} skipped",
        doc.label(),
        report.applied,
        report.duplicates,
        report.skipped
    );
    report
}

async fn fetch_change(doc: &Document, change_id: &str) -> Option<Vec<u8>> {
    let compressed = match doc.remote.fetch_blob(&doc.scopes.changes, change_id).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("Fetching blob of change {change_id} failed: {e}");
            return None;
        }
    };
    match compression::decompress(&compressed) {
        Ok(raw) => Some(raw),
        Err(e) => {
            log::warn!("Skipping change {change_id}: {e}");
            None
        }
    }
}
