//! RocksDB-backed local store.
//!
//! Column families:
//! - `scopes` — document index: scope name → empty marker
//! - `items`  — `<scope>\0<item_id>` → raw payload
//!
//! Scope names never contain a NUL byte, so a prefix scan over
//! `<scope>\0` returns exactly that scope's items, ordered by item id.

use std::path::{Path, PathBuf};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};

use super::{LocalStore, StoreError};

const CF_SCOPES: &str = "scopes";
const CF_ITEMS: &str = "items";

const COLUMN_FAMILIES: &[&str] = &[CF_SCOPES, CF_ITEMS];

const KEY_SEPARATOR: u8 = 0;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every write; a `put` must survive a crash once it returns
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("veil_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed `LocalStore`.
pub struct RocksStore {
    /// Single-threaded mode: column families are fixed at open time
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Local store opened at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_SCOPES => {
                // Tiny keys, no values
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_ITEMS => {
                // Change payloads arrive uncompressed
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            _ => {}
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Force memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family '{name}' not found")))
    }

    fn scope_prefix(scope: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(scope.len() + 1);
        prefix.extend_from_slice(scope.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    fn item_key(scope: &str, item_id: &str) -> Vec<u8> {
        let mut key = Self::scope_prefix(scope);
        key.extend_from_slice(item_id.as_bytes());
        key
    }

    fn decode_str(bytes: &[u8]) -> Result<String, StoreError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

impl LocalStore for RocksStore {
    fn get(&self, scope: &str, item_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(CF_ITEMS)?;
        Ok(self.db.get_cf(cf, Self::item_key(scope, item_id))?)
    }

    fn put(&self, scope: &str, item_id: &str, payload: &[u8]) -> Result<(), StoreError> {
        let cf_scopes = self.cf(CF_SCOPES)?;
        let cf_items = self.cf(CF_ITEMS)?;

        // Atomic batch: index entry + item
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_scopes, scope.as_bytes(), b"");
        batch.put_cf(cf_items, Self::item_key(scope, item_id), payload);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn list_scopes(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_SCOPES)?;
        let mut scopes = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = entry?;
            scopes.push(Self::decode_str(&key)?);
        }
        Ok(scopes)
    }

    fn items(&self, scope: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let cf = self.cf(CF_ITEMS)?;
        let prefix = Self::scope_prefix(scope);

        let mut items = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for entry in iter {
            let (key, value) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            let item_id = Self::decode_str(&key[prefix.len()..])?;
            items.push((item_id, value.to_vec()));
        }
        Ok(items)
    }
}
