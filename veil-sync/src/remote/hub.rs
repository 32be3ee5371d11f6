//! In-memory remote store.
//!
//! ```text
//!              ┌──────────────────────── Hub ────────────────────────┐
//!  HubRemote ─►│ (owner, database) → items  (item_id → body, creator)│
//!  (per user)  │                     blobs  (item_id → bytes)        │
//!              │                     Feed   (fan-out to subscribers) │
//!              │ share token → (owner, database, read_only)          │
//!              └─────────────────────────────────────────────────────┘
//! ```
//!
//! Every user owns their databases by name; share credentials resolve to
//! another user's database. Transactions are validated in full before any
//! op is applied, so a rejected transaction leaves no trace.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::broadcast::{Batch, Feed};
use super::{
    AccessTag, ItemBody, ItemStream, RemoteError, RemoteErrorKind, RemoteItem, RemoteStore,
    Scope, WriteCommand, WriteOp,
};
use crate::config::MAX_BATCH_OPS;

/// Batches buffered per subscriber before it must resync.
const DEFAULT_FEED_CAPACITY: usize = 256;

/// Buffered batches between a subscription forwarder and its consumer.
const STREAM_CAPACITY: usize = 64;

type DbKey = (String, String);

/// Counters for tests and monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub transactions: u64,
    pub item_writes: u64,
    pub blob_uploads: u64,
    pub blob_fetches: u64,
    pub rejected: u64,
}

struct StoredItem {
    body: ItemBody,
    access: AccessTag,
    creator: String,
    seq: u64,
    blob: bool,
}

impl StoredItem {
    fn to_remote(&self, item_id: &str) -> RemoteItem {
        RemoteItem {
            item_id: item_id.to_string(),
            body: self.body.clone(),
            access: self.access,
            blob: self.blob,
        }
    }
}

struct Database {
    items: HashMap<String, StoredItem>,
    blobs: HashMap<String, Vec<u8>>,
    next_seq: u64,
    feed: Feed,
}

impl Database {
    fn new(feed_capacity: usize) -> Self {
        Self {
            items: HashMap::new(),
            blobs: HashMap::new(),
            next_seq: 0,
            feed: Feed::new(feed_capacity),
        }
    }

    /// Items in write order.
    fn snapshot(&self) -> Vec<RemoteItem> {
        let mut items: Vec<(&String, &StoredItem)> = self.items.iter().collect();
        items.sort_by_key(|(_, item)| item.seq);
        items.into_iter().map(|(id, item)| item.to_remote(id)).collect()
    }
}

struct Grant {
    owner: String,
    database: String,
    read_only: bool,
}

#[derive(Default)]
struct HubState {
    databases: HashMap<DbKey, Database>,
    grants: HashMap<String, Grant>,
    faults: VecDeque<RemoteErrorKind>,
    stats: HubStats,
}

/// Shared in-memory remote store.
pub struct Hub {
    state: Mutex<HubState>,
    feed_capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_feed_capacity(feed_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            feed_capacity,
        }
    }

    /// A `RemoteStore` acting as `user`; `None` is a signed-out client.
    pub fn connect(self: &Arc<Self>, user: Option<&str>) -> HubRemote {
        HubRemote {
            hub: Arc::clone(self),
            user: user.map(str::to_string),
            opened: Mutex::new(HashSet::new()),
        }
    }

    /// Fail the next `times` requests with `kind`.
    pub fn inject_failures(&self, kind: RemoteErrorKind, times: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.extend(std::iter::repeat(kind).take(times));
        }
    }

    pub fn stats(&self) -> HubStats {
        self.state
            .lock()
            .map(|state| state.stats.clone())
            .unwrap_or_default()
    }

    /// Items of `owner`'s `database`, in write order.
    pub fn items(&self, owner: &str, database: &str) -> Vec<RemoteItem> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state
            .databases
            .get(&(owner.to_string(), database.to_string()))
            .map(Database::snapshot)
            .unwrap_or_default()
    }

    pub fn blob(&self, owner: &str, database: &str, item_id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().ok()?;
        state
            .databases
            .get(&(owner.to_string(), database.to_string()))?
            .blobs
            .get(item_id)
            .cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubState>, RemoteError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| RemoteError::new(RemoteErrorKind::ServerError, "hub state poisoned"))?;
        if let Some(kind) = state.faults.pop_front() {
            return Err(RemoteError::new(kind, "injected failure"));
        }
        Ok(state)
    }

    fn resolve(
        state: &HubState,
        user: &str,
        scope: &Scope,
        write: bool,
    ) -> Result<DbKey, RemoteError> {
        match scope {
            Scope::Database(name) => Ok((user.to_string(), name.clone())),
            Scope::Share(token) => {
                let grant = state.grants.get(token).ok_or_else(|| {
                    RemoteError::new(RemoteErrorKind::Forbidden, "unknown share token")
                })?;
                if write && grant.read_only {
                    return Err(RemoteError::new(
                        RemoteErrorKind::Forbidden,
                        "share token is read-only",
                    ));
                }
                Ok((grant.owner.clone(), grant.database.clone()))
            }
        }
    }

    fn open(
        &self,
        user: &str,
        scope: &Scope,
    ) -> Result<(DbKey, Vec<RemoteItem>, broadcast::Receiver<Batch>), RemoteError> {
        let mut state = self.lock()?;
        let key = Self::resolve(&state, user, scope, false)?;
        let feed_capacity = self.feed_capacity;
        let db = state
            .databases
            .entry(key.clone())
            .or_insert_with(|| Database::new(feed_capacity));
        // Snapshot and receiver under one lock: no write falls between them.
        let rx = db.feed.subscribe();
        Ok((key, db.snapshot(), rx))
    }

    fn snapshot(&self, key: &DbKey) -> Option<Vec<RemoteItem>> {
        let state = self.state.lock().ok()?;
        state.databases.get(key).map(Database::snapshot)
    }

    fn write(
        &self,
        user: &str,
        scope: &Scope,
        ops: Vec<WriteOp>,
        transaction: bool,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        let result = Self::apply_writes(&mut state, self.feed_capacity, user, scope, ops);
        match &result {
            Ok(()) if transaction => state.stats.transactions += 1,
            Ok(()) => state.stats.item_writes += 1,
            Err(_) => state.stats.rejected += 1,
        }
        result
    }

    fn apply_writes(
        state: &mut HubState,
        feed_capacity: usize,
        user: &str,
        scope: &Scope,
        ops: Vec<WriteOp>,
    ) -> Result<(), RemoteError> {
        if ops.is_empty() || ops.len() > MAX_BATCH_OPS {
            return Err(RemoteError::new(
                RemoteErrorKind::Validation,
                format!("a transaction holds 1 to {MAX_BATCH_OPS} operations, got {}", ops.len()),
            ));
        }
        let key = Self::resolve(state, user, scope, true)?;
        let db = state
            .databases
            .entry(key)
            .or_insert_with(|| Database::new(feed_capacity));

        let mut inserted: HashSet<&str> = HashSet::new();
        for op in &ops {
            let existing = db.items.get(&op.item_id);
            let exists = existing.is_some() || inserted.contains(op.item_id.as_str());
            match op.command {
                WriteCommand::Insert if exists => {
                    return Err(RemoteError::new(
                        RemoteErrorKind::ItemAlreadyExists,
                        format!("item '{}' already exists", op.item_id),
                    ));
                }
                WriteCommand::Insert => {
                    inserted.insert(op.item_id.as_str());
                }
                WriteCommand::Update if !exists => {
                    return Err(RemoteError::new(
                        RemoteErrorKind::ItemMissing,
                        format!("item '{}' does not exist", op.item_id),
                    ));
                }
                WriteCommand::Update => {
                    if let Some(item) = existing {
                        if item.access.only_creator && item.creator != user {
                            return Err(RemoteError::new(
                                RemoteErrorKind::Forbidden,
                                format!("item '{}' is writable by its creator only", op.item_id),
                            ));
                        }
                    }
                }
            }
        }

        let mut changed = Vec::with_capacity(ops.len());
        for op in ops {
            let seq = db.next_seq;
            db.next_seq += 1;
            let item = match db.items.remove(&op.item_id) {
                Some(prev) => StoredItem {
                    body: op.body,
                    access: op.access,
                    creator: prev.creator,
                    seq,
                    blob: prev.blob,
                },
                None => StoredItem {
                    body: op.body,
                    access: op.access,
                    creator: user.to_string(),
                    seq,
                    blob: false,
                },
            };
            changed.push(item.to_remote(&op.item_id));
            db.items.insert(op.item_id, item);
        }
        db.feed.publish(changed);
        Ok(())
    }

    fn upload_blob(
        &self,
        user: &str,
        scope: &Scope,
        item_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        let key = Self::resolve(&state, user, scope, true)?;
        let db = state.databases.get_mut(&key).ok_or_else(|| missing(item_id))?;
        let item = db.items.get_mut(item_id).ok_or_else(|| missing(item_id))?;
        if item.blob {
            // Blobs are immutable once attached.
            return Ok(());
        }
        item.blob = true;
        let published = item.to_remote(item_id);
        db.blobs.insert(item_id.to_string(), bytes);
        db.feed.publish(vec![published]);
        state.stats.blob_uploads += 1;
        Ok(())
    }

    fn fetch_blob(&self, user: &str, scope: &Scope, item_id: &str) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.lock()?;
        let key = Self::resolve(&state, user, scope, false)?;
        let bytes = state
            .databases
            .get(&key)
            .and_then(|db| db.blobs.get(item_id))
            .cloned()
            .ok_or_else(|| missing(item_id))?;
        state.stats.blob_fetches += 1;
        Ok(bytes)
    }

    fn create_share(&self, user: &str, scope: &Scope, read_only: bool) -> Result<String, RemoteError> {
        let mut state = self.lock()?;
        let Scope::Database(name) = scope else {
            return Err(RemoteError::new(
                RemoteErrorKind::Forbidden,
                "only the owner can share a database",
            ));
        };
        let token = Uuid::new_v4().to_string();
        state.grants.insert(
            token.clone(),
            Grant {
                owner: user.to_string(),
                database: name.clone(),
                read_only,
            },
        );
        Ok(token)
    }
}

fn missing(item_id: &str) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::ItemMissing,
        format!("item '{item_id}' does not exist"),
    )
}

/// One user's connection to a `Hub`.
///
/// Tracks which scopes this client has opened: writing to a scope that was
/// never subscribed fails with `DatabaseNotOpen`.
pub struct HubRemote {
    hub: Arc<Hub>,
    user: Option<String>,
    opened: Mutex<HashSet<Scope>>,
}

impl HubRemote {
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn signed_in(&self) -> Result<&str, RemoteError> {
        self.user
            .as_deref()
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::NotSignedIn, "sign in first"))
    }

    fn opened_user(&self, scope: &Scope) -> Result<&str, RemoteError> {
        let user = self.signed_in()?;
        let opened = self
            .opened
            .lock()
            .map(|opened| opened.contains(scope))
            .unwrap_or(false);
        if !opened {
            return Err(RemoteError::new(
                RemoteErrorKind::DatabaseNotOpen,
                format!("{scope} is not open"),
            ));
        }
        Ok(user)
    }
}

#[async_trait]
impl RemoteStore for HubRemote {
    fn is_signed_in(&self) -> bool {
        self.user.is_some()
    }

    async fn subscribe(&self, scope: &Scope) -> Result<ItemStream, RemoteError> {
        let user = self.signed_in()?;
        let (key, snapshot, mut feed_rx) = self.hub.open(user, scope)?;
        if let Ok(mut opened) = self.opened.lock() {
            opened.insert(scope.clone());
        }

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        // Fresh channel: the snapshot always fits.
        let _ = tx.try_send(snapshot);

        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    batch = feed_rx.recv() => match batch {
                        Ok(batch) => {
                            if tx.send(batch.as_ref().clone()).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Subscriber lagged by {n} batches, resyncing snapshot");
                            let Some(snapshot) = hub.snapshot(&key) else { break };
                            if tx.send(snapshot).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(rx)
    }

    async fn write_batch(&self, scope: &Scope, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        let user = self.opened_user(scope)?;
        self.hub.write(user, scope, ops, true)
    }

    async fn write_item(&self, scope: &Scope, op: WriteOp) -> Result<(), RemoteError> {
        let user = self.opened_user(scope)?;
        self.hub.write(user, scope, vec![op], false)
    }

    async fn upload_blob(
        &self,
        scope: &Scope,
        item_id: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError> {
        let user = self.opened_user(scope)?;
        self.hub.upload_blob(user, scope, item_id, bytes)
    }

    async fn fetch_blob(&self, scope: &Scope, item_id: &str) -> Result<Vec<u8>, RemoteError> {
        let user = self.opened_user(scope)?;
        self.hub.fetch_blob(user, scope, item_id)
    }

    async fn create_share_credential(
        &self,
        scope: &Scope,
        read_only: bool,
    ) -> Result<String, RemoteError> {
        let user = self.opened_user(scope)?;
        self.hub.create_share(user, scope, read_only)
    }
}
