//! Per-document engine state shared by the session's tasks.
//!
//! ```text
//!             ┌──────────────── Document ────────────────┐
//!  editor ───►│ ChangeQueue ─► state (tokio Mutex)       │
//!  changes ──►│                 replica, name, applied,  │──► LocalStore mirror
//!  stream     │                 stored_on_server, pending│
//!             │ ready flags, loaded signal, editor slot  │
//!             └──────────────────────────────────────────┘
//! ```
//!
//! The change queue orders every replica mutation; the mutex only makes the
//! shared state safe to reach from several tasks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, Mutex as AsyncMutex};
use uuid::Uuid;
use veil_core::{Change, CoreError, DeltaOp, TextReplica};

use crate::config::SyncConfig;
use crate::editor::{Editor, Origin};
use crate::library;
use crate::outbound::OutboundChange;
use crate::queue::ChangeQueue;
use crate::remote::{RemoteStore, Scope, WriteCommand};
use crate::storage::LocalStore;

/// Mutable document state.
pub struct DocState {
    pub replica: TextReplica,
    pub name: String,
    /// Change ids already applied to `replica`.
    pub applied: HashSet<String>,
    /// Change ids seen in the remote change stream.
    pub stored_on_server: HashSet<String>,
    /// Changes waiting for the next push.
    pub pending: Vec<OutboundChange>,
}

impl DocState {
    pub fn new(replica: TextReplica, name: impl Into<String>) -> Self {
        Self {
            replica,
            name: name.into(),
            applied: HashSet::new(),
            stored_on_server: HashSet::new(),
            pending: Vec::new(),
        }
    }
}

/// Where a document's streams live remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteScopes {
    pub changes: Scope,
    pub metadata: Scope,
}

pub struct Document {
    /// Local document id; `None` for documents opened through a share token,
    /// which are not mirrored locally.
    pub(crate) id: Option<Uuid>,
    pub(crate) scopes: RemoteScopes,
    pub(crate) config: SyncConfig,
    pub(crate) queue: Arc<ChangeQueue>,
    pub(crate) state: AsyncMutex<DocState>,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) remote: Arc<dyn RemoteStore>,
    editor: Mutex<Option<Arc<dyn Editor>>>,
    changes_ready: AtomicBool,
    metadata_ready: AtomicBool,
    mounted: AtomicBool,
    loaded: watch::Sender<bool>,
}

impl Document {
    pub fn new(
        id: Option<Uuid>,
        scopes: RemoteScopes,
        state: DocState,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            id,
            scopes,
            config,
            queue: ChangeQueue::new(),
            state: AsyncMutex::new(state),
            store,
            remote,
            editor: Mutex::new(None),
            changes_ready: AtomicBool::new(false),
            metadata_ready: AtomicBool::new(false),
            mounted: AtomicBool::new(true),
            loaded: watch::channel(false).0,
        }
    }

    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.to_string(),
            None => "shared document".to_string(),
        }
    }

    /// Both streams delivered their first batch; pushes may start.
    pub fn is_ready(&self) -> bool {
        self.changes_ready.load(Ordering::SeqCst) && self.metadata_ready.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_changes_ready(&self) {
        self.changes_ready.store(true, Ordering::SeqCst);
        self.loaded.send_replace(true);
    }

    pub(crate) fn metadata_ready(&self) -> bool {
        self.metadata_ready.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_metadata_ready(&self) {
        self.metadata_ready.store(true, Ordering::SeqCst);
    }

    /// Wait until the first change batch has been processed.
    pub async fn wait_loaded(&self) {
        let mut loaded = self.loaded.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = loaded.wait_for(|loaded| *loaded).await;
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub(crate) fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
        self.set_editor(None);
    }

    pub(crate) fn set_editor(&self, editor: Option<Arc<dyn Editor>>) {
        if let Ok(mut slot) = self.editor.lock() {
            *slot = editor;
        }
    }

    pub(crate) fn editor(&self) -> Option<Arc<dyn Editor>> {
        self.editor.lock().ok().and_then(|slot| slot.clone())
    }

    /// Replace the editor's contents with the replica, keeping the selection.
    pub(crate) fn render(&self, state: &DocState) {
        let Some(editor) = self.editor() else {
            return;
        };
        let selection = editor.selection();
        editor.set_contents(state.replica.to_delta(), Origin::Api);
        if let Some(selection) = selection {
            editor.set_selection(selection, Origin::Api);
        }
    }

    /// Locally cached copy of a change.
    pub(crate) fn cached_change(&self, change_id: &str) -> Option<Vec<u8>> {
        let id = self.id?;
        match library::get_change(self.store.as_ref(), &id, change_id) {
            Ok(cached) => cached,
            Err(e) => {
                log::warn!("Reading cached change {change_id} failed: {e}");
                None
            }
        }
    }

    pub(crate) fn mirror_change(&self, change: &Change) {
        let Some(id) = self.id else { return };
        if let Err(e) = library::put_change(self.store.as_ref(), &id, change) {
            log::error!("Storing change {} of {id} failed: {e}", change.id);
        }
    }

    pub(crate) fn mirror_name(&self, name: &str) {
        let Some(id) = self.id else { return };
        if let Err(e) = library::put_name(self.store.as_ref(), &id, name) {
            log::error!("Storing name of {id} failed: {e}");
        }
    }

    /// Apply a user edit: the new change is recorded as applied, stored
    /// locally and queued for the next push. Returns the change id, or
    /// `None` when the delta changed nothing.
    pub async fn apply_local_edit(&self, delta: &[DeltaOp]) -> Result<Option<String>, CoreError> {
        let _slot = self.queue.acquire().await;
        let change = {
            let mut state = self.state.lock().await;
            let Some(payload) = state.replica.apply_delta(delta)? else {
                return Ok(None);
            };
            let change = Change::new(payload);
            state.applied.insert(change.id.clone());
            state.pending.push(OutboundChange::change(
                self.scopes.changes.clone(),
                change.id.clone(),
                change.payload.clone(),
            ));
            change
        };
        self.mirror_change(&change);
        Ok(Some(change.id))
    }

    /// Rename the document. Empty names are ignored.
    pub async fn commit_name(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        {
            let mut state = self.state.lock().await;
            if state.name == name {
                return false;
            }
            state.name = name.to_string();
            state.pending.push(OutboundChange::name(
                self.scopes.metadata.clone(),
                name,
                WriteCommand::Update,
            ));
        }
        self.mirror_name(name);
        true
    }
}
