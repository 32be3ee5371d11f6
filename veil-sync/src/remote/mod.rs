//! Remote replicated store interface.
//!
//! The remote store holds encrypted items in named databases (scopes),
//! delivers them to subscribers, stores standalone blobs next to items, and
//! issues share credentials that give another user access to one scope.
//!
//! ```text
//!  DocumentSession ──► RemoteStore ─┬─ HubRemote ──► Hub (in-process)
//!                                   └─ RemoteClient ══ WebSocket ══► RemoteServer ──► Hub
//! ```
//!
//! ## Modules
//!
//! - [`hub`] — In-memory store: databases, blobs, share grants, fan-out
//! - [`broadcast`] — Per-database subscriber fan-out
//! - [`protocol`] — Binary wire frames (bincode)
//! - [`server`] — WebSocket front-end over a `Hub`
//! - [`client`] — WebSocket `RemoteStore` implementation

pub mod broadcast;
pub mod client;
pub mod hub;
pub mod protocol;
pub mod server;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Where an item lives: a database owned by the signed-in user, or a
/// database reached through a share credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Database(String),
    Share(String),
}

impl Scope {
    pub fn database(name: impl Into<String>) -> Self {
        Scope::Database(name.into())
    }

    pub fn share(token: impl Into<String>) -> Self {
        Scope::Share(token.into())
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Database(name) => write!(f, "db:{name}"),
            Scope::Share(_) => write!(f, "share:<token>"),
        }
    }
}

/// Item payload variants stored in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemBody {
    /// An LZ4-compressed change, inline.
    Compressed(Vec<u8>),
    /// Marker for a change whose compressed bytes live in the item's blob.
    StoredAsFile,
    /// Document name.
    Name(String),
    /// `all-share-tokens` entry: top-level share token of a document.
    ShareToken(String),
    /// Share credential for a document's change stream.
    ChangesShareToken(String),
    /// Share credential for a document's metadata stream.
    MetadataShareToken(String),
}

/// Write access restriction attached to an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTag {
    /// Only the user that created the item may overwrite it.
    pub only_creator: bool,
}

impl AccessTag {
    pub fn creator_only() -> Self {
        Self { only_creator: true }
    }
}

/// An item as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub item_id: String,
    pub body: ItemBody,
    pub access: AccessTag,
    /// A blob has been uploaded for this item.
    pub blob: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteCommand {
    Insert,
    Update,
}

/// One item write, alone or inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOp {
    pub command: WriteCommand,
    pub item_id: String,
    pub body: ItemBody,
    pub access: AccessTag,
}

impl WriteOp {
    pub fn insert(item_id: impl Into<String>, body: ItemBody) -> Self {
        Self {
            command: WriteCommand::Insert,
            item_id: item_id.into(),
            body,
            access: AccessTag::default(),
        }
    }

    pub fn update(item_id: impl Into<String>, body: ItemBody) -> Self {
        Self {
            command: WriteCommand::Update,
            ..Self::insert(item_id, body)
        }
    }

    pub fn creator_only(mut self) -> Self {
        self.access = AccessTag::creator_only();
        self
    }
}

/// Classification of remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    /// Server-side failure (5xx).
    ServerError,
    NotSignedIn,
    /// The scope was not opened (subscribed) before writing.
    DatabaseNotOpen,
    ItemAlreadyExists,
    ItemMissing,
    Forbidden,
    Validation,
    ConnectionClosed,
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Transient failures are retried at a fixed delay; everything else is
    /// abandoned.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::ServerError
                | RemoteErrorKind::NotSignedIn
                | RemoteErrorKind::DatabaseNotOpen
                | RemoteErrorKind::ConnectionClosed
        )
    }
}

/// Stream of item batches from one subscription: the full snapshot first,
/// incremental batches after.
pub type ItemStream = mpsc::Receiver<Vec<RemoteItem>>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn is_signed_in(&self) -> bool;

    /// Open `scope` and stream its items. Opening is required before writes.
    async fn subscribe(&self, scope: &Scope) -> Result<ItemStream, RemoteError>;

    /// Apply up to ten writes atomically.
    async fn write_batch(&self, scope: &Scope, ops: Vec<WriteOp>) -> Result<(), RemoteError>;

    async fn write_item(&self, scope: &Scope, op: WriteOp) -> Result<(), RemoteError>;

    /// Attach a blob to an existing item.
    async fn upload_blob(
        &self,
        scope: &Scope,
        item_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError>;

    async fn fetch_blob(&self, scope: &Scope, item_id: &str) -> Result<Vec<u8>, RemoteError>;

    /// Issue a credential granting access to `scope`.
    async fn create_share_credential(
        &self,
        scope: &Scope,
        read_only: bool,
    ) -> Result<String, RemoteError>;
}

/// Open `scope` and return its current items. The subscription ends here.
pub async fn snapshot(
    remote: &dyn RemoteStore,
    scope: &Scope,
) -> Result<Vec<RemoteItem>, RemoteError> {
    let mut stream = remote.subscribe(scope).await?;
    stream.recv().await.ok_or_else(|| {
        RemoteError::new(
            RemoteErrorKind::ConnectionClosed,
            format!("{scope} closed before its snapshot"),
        )
    })
}
