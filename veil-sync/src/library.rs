//! Documents in the local store: create, load, list.
//!
//! Layout per document `d`:
//! ```text
//! d_changes   change id → raw change bytes   ("TextDoc" holds the initial "\n")
//! d_metadata  "DocName" → bincode(String)
//! ```

use std::collections::HashSet;

use uuid::Uuid;
use veil_core::{Change, TextCrdt, TextReplica, NAME_ITEM_ID};

use crate::scope::{changes_scope, doc_id_of_metadata_scope, metadata_scope};
use crate::storage::{LocalStore, StoreError};

/// Name given to new documents.
pub const DEFAULT_NAME: &str = "Untitled";

/// A document rebuilt from the local store.
pub struct LoadedDocument {
    pub id: Uuid,
    pub name: String,
    pub replica: TextReplica,
    /// Ids of every change applied to `replica`.
    pub applied: HashSet<String>,
    /// Every stored change; all of them are queued for the next push.
    pub changes: Vec<Change>,
}

/// Dashboard entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub name: String,
}

fn encode_name(name: &str) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(name, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_name(bytes: &[u8]) -> Result<String, StoreError> {
    let (name, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(name)
}

/// Create a document holding a single newline, named [`DEFAULT_NAME`].
pub fn create_document(store: &dyn LocalStore) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();
    let (_, initial) =
        TextReplica::new_document().map_err(|e| StoreError::Corrupt(e.to_string()))?;
    put_change(store, &id, &initial)?;
    put_name(store, &id, DEFAULT_NAME)?;
    log::info!("Created document {id}");
    Ok(id)
}

/// Load document `id`; `None` when it has no name item.
///
/// Changes that fail to decode are skipped with a warning.
pub fn load_document(store: &dyn LocalStore, id: Uuid) -> Result<Option<LoadedDocument>, StoreError> {
    let Some(name) = read_name(store, &id)? else {
        return Ok(None);
    };

    let mut replica = TextReplica::new();
    let mut applied = HashSet::new();
    let mut changes = Vec::new();
    for (change_id, payload) in store.items(&changes_scope(&id))? {
        if let Err(e) = replica.apply_changes(&[&payload]) {
            log::warn!("Skipping unreadable change {change_id} of {id}: {e}");
            continue;
        }
        applied.insert(change_id.clone());
        changes.push(Change::with_id(change_id, payload));
    }

    log::debug!("Loaded document {id} from {} changes", changes.len());
    Ok(Some(LoadedDocument {
        id,
        name,
        replica,
        applied,
        changes,
    }))
}

/// Every document with a name, in store order.
pub fn list_documents(store: &dyn LocalStore) -> Result<Vec<DocumentSummary>, StoreError> {
    let mut documents = Vec::new();
    for scope in store.list_scopes()? {
        let Some(id) = doc_id_of_metadata_scope(&scope) else {
            continue;
        };
        if let Some(name) = read_name(store, &id)? {
            documents.push(DocumentSummary { id, name });
        }
    }
    Ok(documents)
}

/// Locally cached change `change_id` of document `id`.
pub fn get_change(
    store: &dyn LocalStore,
    id: &Uuid,
    change_id: &str,
) -> Result<Option<Vec<u8>>, StoreError> {
    store.get(&changes_scope(id), change_id)
}

pub fn put_change(store: &dyn LocalStore, id: &Uuid, change: &Change) -> Result<(), StoreError> {
    store.put(&changes_scope(id), &change.id, &change.payload)
}

pub fn put_name(store: &dyn LocalStore, id: &Uuid, name: &str) -> Result<(), StoreError> {
    store.put(&metadata_scope(id), NAME_ITEM_ID, &encode_name(name)?)
}

fn read_name(store: &dyn LocalStore, id: &Uuid) -> Result<Option<String>, StoreError> {
    store
        .get(&metadata_scope(id), NAME_ITEM_ID)?
        .map(|bytes| decode_name(&bytes))
        .transpose()
}
