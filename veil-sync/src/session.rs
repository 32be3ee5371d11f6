//! An open document: the unit an editing view works with.
//!
//! Architecture:
//! ```text
//!                     ┌─────────────── DocumentSession ───────────────┐
//!  editor edits ─────►│ on_editor_change ──► Document (queue)         │
//!  changes stream ───►│ subscription task ─► handle_change_items      │
//!  metadata stream ──►│ subscription task ─► handle_metadata_items    │
//!                     │ push timer ────────► push_server_changes      │
//!                     └──────────────────────────┬────────────────────┘
//!                                                ▼
//!                                   PushWorker ──► RemoteStore
//! ```
//!
//! Every task and scheduled retry hangs off the session's cancellation
//! token; `close` (or dropping the session) stops them all.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use veil_core::{CoreError, DeltaOp, TextReplica};

use crate::config::SyncConfig;
use crate::document::{DocState, Document, RemoteScopes};
use crate::editor::{Editor, Origin};
use crate::inbound::handle_change_items;
use crate::library;
use crate::metadata::handle_metadata_items;
use crate::outbound::{push_server_changes, OutboundChange};
use crate::remote::{RemoteError, RemoteStore, Scope};
use crate::retry::{PushStats, PushWorker};
use crate::scope::{changes_scope, metadata_scope};
use crate::share::{self, ShareError};
use crate::storage::{LocalStore, StoreError};

/// How a session finds its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// A document in the local store.
    Local(Uuid),
    /// A document shared with this user through a share token.
    Shared(String),
}

/// Failures opening or editing a document, shown to the user.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("sign in to open shared documents")]
    SignInRequired,
    #[error("document {0} not found")]
    DocumentNotFound(Uuid),
    #[error("share token does not lead to a document")]
    InvalidShareToken,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("invalid edit: {0}")]
    Edit(#[from] CoreError),
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Changes,
    Metadata,
}

pub struct DocumentSession {
    doc: Arc<Document>,
    worker: Arc<PushWorker>,
    share_token: Option<String>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DocumentSession {
    /// Open a document and start syncing it.
    ///
    /// A local document with text is usable at once; its streams open in the
    /// background when the remote is signed in. A document without local
    /// text (every shared document) blocks here until its first change batch
    /// has been applied.
    pub async fn open(
        source: DocumentSource,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Result<Self, SessionError> {
        let (id, scopes, state, share_token) = match source {
            DocumentSource::Local(id) => {
                let loaded = library::load_document(store.as_ref(), id)?
                    .ok_or(SessionError::DocumentNotFound(id))?;
                let scopes = RemoteScopes {
                    changes: Scope::database(changes_scope(&id)),
                    metadata: Scope::database(metadata_scope(&id)),
                };
                let mut state = DocState::new(loaded.replica, loaded.name);
                state.applied = loaded.applied;
                state.pending = loaded
                    .changes
                    .into_iter()
                    .map(|change| {
                        OutboundChange::change(scopes.changes.clone(), change.id, change.payload)
                    })
                    .collect();
                (Some(id), scopes, state, None)
            }
            DocumentSource::Shared(token) => {
                if !remote.is_signed_in() {
                    return Err(SessionError::SignInRequired);
                }
                let credentials = share::resolve_share_token(remote.as_ref(), &token)
                    .await?
                    .ok_or(SessionError::InvalidShareToken)?;
                let scopes = RemoteScopes {
                    changes: Scope::share(credentials.changes),
                    metadata: Scope::share(credentials.metadata),
                };
                let state = DocState::new(TextReplica::new(), String::new());
                (None, scopes, state, Some(token))
            }
        };

        let has_text = !state.replica.is_empty();
        let signed_in = remote.is_signed_in();
        let doc = Arc::new(Document::new(id, scopes, state, store, remote.clone(), config.clone()));
        let cancel = CancellationToken::new();
        let worker = Arc::new(PushWorker::spawn(remote, &config, &cancel));

        let mut session = Self {
            doc,
            worker,
            share_token,
            cancel,
            tasks: Vec::new(),
        };
        if signed_in {
            session.start();
        }
        log::info!("Opened {}", session.doc.label());

        if !has_text && signed_in {
            session.doc.wait_loaded().await;
        }
        Ok(session)
    }

    fn start(&mut self) {
        let doc = &self.doc;
        self.tasks.push(tokio::spawn(run_subscription(
            doc.clone(),
            doc.scopes.changes.clone(),
            Stream::Changes,
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(run_subscription(
            doc.clone(),
            doc.scopes.metadata.clone(),
            Stream::Metadata,
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(run_push_timer(
            doc.clone(),
            self.worker.clone(),
            self.cancel.clone(),
        )));
    }

    /// Local document id; `None` for shared documents.
    pub fn id(&self) -> Option<Uuid> {
        self.doc.id
    }

    pub async fn name(&self) -> String {
        self.doc.state.lock().await.name.clone()
    }

    pub async fn text(&self) -> String {
        self.doc.state.lock().await.replica.text()
    }

    pub async fn contents(&self) -> Vec<DeltaOp> {
        self.doc.state.lock().await.replica.to_delta()
    }

    /// Changes waiting for the next push.
    pub async fn pending(&self) -> usize {
        self.doc.state.lock().await.pending.len()
    }

    /// Both streams have delivered their first batch.
    pub fn is_ready(&self) -> bool {
        self.doc.is_ready()
    }

    /// Wait for the first change batch.
    pub async fn loaded(&self) {
        self.doc.wait_loaded().await;
    }

    /// Network writes not yet finished, retries included.
    pub fn pushes_in_flight(&self) -> usize {
        self.worker.in_flight()
    }

    pub fn push_stats(&self) -> PushStats {
        self.worker.stats()
    }

    /// Show the document in `editor` and keep it updated.
    pub async fn attach_editor(&self, editor: Arc<dyn Editor>) {
        let _slot = self.doc.queue.acquire().await;
        let state = self.doc.state.lock().await;
        self.doc.set_editor(Some(editor));
        self.doc.render(&state);
    }

    /// Feed an editor change into the document. Only user edits count;
    /// returns the id of the recorded change.
    pub async fn on_editor_change(
        &self,
        delta: &[DeltaOp],
        origin: Origin,
    ) -> Result<Option<String>, SessionError> {
        if origin != Origin::User || !self.doc.is_mounted() {
            return Ok(None);
        }
        Ok(self.doc.apply_local_edit(delta).await?)
    }

    /// Rename the document (on blur or Enter). Empty names are ignored.
    pub async fn commit_name(&self, name: &str) -> bool {
        self.doc.commit_name(name).await
    }

    /// Share token for this document, created on first use.
    pub async fn share(&self) -> Result<String, ShareError> {
        if let Some(token) = &self.share_token {
            return Ok(token.clone());
        }
        match self.doc.id {
            Some(id) => share::share_document(self.doc.remote.as_ref(), &id).await,
            None => Err(ShareError::SignInRequired),
        }
    }

    /// Stop syncing and detach the editor. Pending retries are dropped.
    pub async fn close(mut self) {
        self.shutdown();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        log::info!("Closed {}", self.doc.label());
    }

    fn shutdown(&self) {
        self.doc.unmount();
        self.cancel.cancel();
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_subscription(doc: Arc<Document>, scope: Scope, stream: Stream, cancel: CancellationToken) {
    let retry_delay = doc.config.subscribe_retry_delay;
    loop {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            opened = doc.remote.subscribe(&scope) => opened,
        };
        match opened {
            Ok(mut items) => {
                log::debug!("Subscribed to {scope} ({stream:?})");
                loop {
                    let batch = tokio::select! {
                        biased;
                        () = cancel.cancelled() => return,
                        batch = items.recv() => batch,
                    };
                    let Some(batch) = batch else { break };
                    match stream {
                        Stream::Changes => {
                            handle_change_items(&doc, batch).await;
                        }
                        Stream::Metadata => {
                            handle_metadata_items(&doc, batch).await;
                        }
                    }
                }
                log::warn!("{scope} stream ended, resubscribing");
            }
            Err(e) => log::debug!("Opening {scope} failed: {e}"),
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(retry_delay) => {}
        }
    }
}

async fn run_push_timer(doc: Arc<Document>, worker: Arc<PushWorker>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(doc.config.push_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if doc.is_ready() {
                    push_server_changes(&doc, &worker).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::hub::Hub;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_missing_local_document() {
        let hub = Hub::new();
        let id = Uuid::new_v4();
        let err = DocumentSession::open(
            DocumentSource::Local(id),
            Arc::new(MemoryStore::new()),
            Arc::new(hub.connect(Some("alice"))),
            SyncConfig::for_testing(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SessionError::DocumentNotFound(missing) if missing == id));
    }

    #[tokio::test]
    async fn test_shared_document_requires_sign_in() {
        let hub = Hub::new();
        let err = DocumentSession::open(
            DocumentSource::Shared("token".into()),
            Arc::new(MemoryStore::new()),
            Arc::new(hub.connect(None)),
            SyncConfig::for_testing(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SessionError::SignInRequired));
    }

    #[tokio::test]
    async fn test_offline_session_edits_locally() {
        let hub = Hub::new();
        let store = Arc::new(MemoryStore::new());
        let id = library::create_document(store.as_ref()).unwrap();

        let session = DocumentSession::open(
            DocumentSource::Local(id),
            store.clone(),
            Arc::new(hub.connect(None)),
            SyncConfig::for_testing(),
        )
        .await
        .unwrap();

        let change = session
            .on_editor_change(&[DeltaOp::insert("offline")], Origin::User)
            .await
            .unwrap();
        assert!(change.is_some());
        assert!(session
            .on_editor_change(&[DeltaOp::insert("ignored")], Origin::Api)
            .await
            .unwrap()
            .is_none());

        assert_eq!(session.text().await, "offline\n");
        // Initial change plus the edit, held until a signed-in session pushes.
        assert_eq!(session.pending().await, 2);
        assert!(!session.is_ready());
        session.close().await;

        let reloaded = library::load_document(store.as_ref(), id).unwrap().unwrap();
        assert_eq!(reloaded.replica.text(), "offline\n");
    }
}
