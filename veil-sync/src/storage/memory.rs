//! In-memory `LocalStore` for tests and ephemeral sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::{LocalStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    scopes: BTreeSet<String>,
    items: BTreeMap<(String, String), Vec<u8>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, scope: &str, item_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .items
            .get(&(scope.to_string(), item_id.to_string()))
            .cloned())
    }

    fn put(&self, scope: &str, item_id: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        tables.scopes.insert(scope.to_string());
        tables
            .items
            .insert((scope.to_string(), item_id.to_string()), payload.to_vec());
        Ok(())
    }

    fn list_scopes(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tables()?.scopes.iter().cloned().collect())
    }

    fn items(&self, scope: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .items
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|((_, id), payload)| (id.clone(), payload.clone()))
            .collect())
    }
}
