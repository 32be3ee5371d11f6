//! On-device store for document changes and metadata.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐   put(scope, item)   ┌──────────────────────────────────┐
//! │ Session      │ ───────────────────► │ LocalStore                       │
//! │ Library      │ ◄─────────────────── │                                  │
//! └──────────────┘     get / items      │ "scopes" — scope name → presence │
//!                                       │ "items"  — (scope, item) → bytes │
//!                                       └──────────────────────────────────┘
//! ```
//!
//! A document's content changes live in `{docId}_changes` (raw,
//! uncompressed change bytes keyed by change id) and its name in
//! `{docId}_metadata` under `DocName`. Every `put` registers its scope in
//! the index within the same atomic write.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use thiserror::Error;

/// Local store errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Keyed, durable item storage shared by every open document.
///
/// Implementations are internally synchronized; no cross-document locking
/// is needed because no invariant spans two documents.
pub trait LocalStore: Send + Sync {
    fn get(&self, scope: &str, item_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Durable and atomic per call; also records `scope` in the index.
    fn put(&self, scope: &str, item_id: &str, payload: &[u8]) -> Result<(), StoreError>;

    /// Every scope that has ever received an item.
    fn list_scopes(&self) -> Result<Vec<String>, StoreError>;

    /// All items of `scope`, ordered by item id.
    fn items(&self, scope: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}
