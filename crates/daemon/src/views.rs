//! View counter store.
//!
//! One record per video: `views/<id>` holding an 8-byte big-endian counter.
//! Older databases keyed counters as `views/<collection>/<id>`; those are
//! moved to the canonical key the first time the video is requested.

use redb::{ReadableDatabase, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::info;

const VIEWS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("views");

/// Errors raised by the view store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Durable engine failure
    #[error("Database error: {0}")]
    Database(#[from] redb::Error),

    /// A stored counter is not 8 bytes
    #[error("Corrupt view counter at '{key}': {len} bytes")]
    Corrupt { key: String, len: usize },
}

macro_rules! impl_from_redb {
    ($($ty:ty),*) => {
        $(impl From<$ty> for StoreError {
            fn from(e: $ty) -> Self {
                StoreError::Database(e.into())
            }
        })*
    };
}

impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

/// Minimal single-key contract of the durable engine
pub trait KvStore: Send + Sync {
    /// `Ok(None)` is not-found.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Key-value engine backed by a redb file
#[derive(Debug)]
pub struct RedbStore {
    db: redb::Database,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = redb::Database::create(path)?;
        let write_txn = db.begin_write()?;
        write_txn.open_table(VIEWS_TABLE)?;
        write_txn.commit()?;
        Ok(Self { db })
    }
}

impl KvStore for RedbStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(VIEWS_TABLE)?;
        Ok(table.get(key)?.map(|value| value.value().to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(VIEWS_TABLE)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(VIEWS_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

/// In-memory engine
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

fn views_key(id: &str) -> String {
    format!("views/{}", id)
}

fn legacy_views_key(collection: &str, id: &str) -> String {
    format!("views/{}/{}", collection, id)
}

fn decode(key: &str, bytes: &[u8]) -> Result<u64, StoreError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        len: bytes.len(),
    })?;
    Ok(u64::from_be_bytes(raw))
}

/// Per-video view counters over a [`KvStore`]
pub struct ViewStore {
    store: Box<dyn KvStore>,
}

impl std::fmt::Debug for ViewStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewStore").finish_non_exhaustive()
    }
}

impl ViewStore {
    pub fn new(store: impl KvStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Open a redb-backed store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(RedbStore::open(path)?))
    }

    /// In-memory store, for tests and ephemeral runs.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Current count for `id`; 0 if never viewed.
    pub fn get_views(&self, id: &str) -> Result<u64, StoreError> {
        let key = views_key(id);
        match self.store.get(&key)? {
            Some(bytes) => decode(&key, &bytes),
            None => Ok(0),
        }
    }

    /// Increment the count for `id`.
    ///
    /// # Returns
    /// The new count
    pub fn inc_views(&self, id: &str) -> Result<u64, StoreError> {
        let views = self.get_views(id)?.saturating_add(1);
        self.store.put(&views_key(id), &views.to_be_bytes())?;
        Ok(views)
    }

    /// Move a legacy `views/<collection>/<id>` counter to `views/<id>`.
    ///
    /// No-op when `collection` is empty or the legacy key is absent.
    pub fn migrate(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        if collection.is_empty() {
            return Ok(());
        }

        let legacy = legacy_views_key(collection, id);
        let Some(bytes) = self.store.get(&legacy)? else {
            return Ok(());
        };
        let views = decode(&legacy, &bytes)?;

        self.store.put(&views_key(id), &views.to_be_bytes())?;
        self.store.delete(&legacy)?;
        info!(id, collection, views, "Migrated legacy view counter");
        Ok(())
    }

    /// Release the underlying engine.
    pub fn close(self) {
        drop(self.store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_id_has_zero_views() {
        let store = ViewStore::in_memory();
        assert_eq!(store.get_views("nope").unwrap(), 0);
    }

    #[test]
    fn test_redb_counts_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("views.db");

        let store = ViewStore::open(&path).unwrap();
        store.inc_views("clip").unwrap();
        store.inc_views("clip").unwrap();
        store.close();

        let store = ViewStore::open(&path).unwrap();
        assert_eq!(store.get_views("clip").unwrap(), 2);
        assert_eq!(store.get_views("other").unwrap(), 0);
    }

    #[test]
    fn test_counter_encoding_is_big_endian() {
        let kv = MemoryStore::new();
        kv.put("views/clip", &258u64.to_be_bytes()).unwrap();
        let store = ViewStore::new(kv);
        assert_eq!(store.get_views("clip").unwrap(), 258);
    }

    #[test]
    fn test_corrupt_counter_is_surfaced() {
        let kv = MemoryStore::new();
        kv.put("views/clip", b"abc").unwrap();
        let store = ViewStore::new(kv);
        assert!(matches!(
            store.get_views("clip"),
            Err(StoreError::Corrupt { len: 3, .. })
        ));
        assert!(store.inc_views("clip").is_err());
    }

    #[test]
    fn test_migrate_moves_value_and_deletes_legacy_key() {
        let dir = TempDir::new().unwrap();
        let kv = RedbStore::open(&dir.path().join("views.db")).unwrap();
        kv.put("views/talks/keynote", &7u64.to_be_bytes()).unwrap();
        let store = ViewStore::new(kv);

        store.migrate("talks", "keynote").unwrap();
        assert_eq!(store.get_views("keynote").unwrap(), 7);
        assert!(store.store.get("views/talks/keynote").unwrap().is_none());

        // second call finds no legacy key
        store.inc_views("keynote").unwrap();
        store.migrate("talks", "keynote").unwrap();
        assert_eq!(store.get_views("keynote").unwrap(), 8);
    }

    #[test]
    fn test_migrate_without_legacy_key_is_noop() {
        let store = ViewStore::in_memory();
        store.inc_views("clip").unwrap();
        store.migrate("talks", "clip").unwrap();
        assert_eq!(store.get_views("clip").unwrap(), 1);
    }

    #[test]
    fn test_migrate_with_empty_collection_skips_lookup() {
        let kv = MemoryStore::new();
        // would be the legacy key for collection "" if it were consulted
        kv.put("views//clip", &5u64.to_be_bytes()).unwrap();
        let store = ViewStore::new(kv);

        store.migrate("", "clip").unwrap();
        assert_eq!(store.get_views("clip").unwrap(), 0);
        assert!(store.store.get("views//clip").unwrap().is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_k_increments_read_back_k(id in "[a-z0-9/]{1,16}", k in 0u64..40) {
            let store = ViewStore::in_memory();
            for _ in 0..k {
                store.inc_views(&id).unwrap();
            }
            prop_assert_eq!(store.get_views(&id).unwrap(), k);
        }

        #[test]
        fn prop_migrate_moves_exact_value(
            collection in "[a-z]{1,8}",
            id in "[a-z0-9]{1,12}",
            legacy in any::<u64>(),
        ) {
            let kv = MemoryStore::new();
            kv.put(&format!("views/{}/{}", collection, id), &legacy.to_be_bytes()).unwrap();
            let store = ViewStore::new(kv);

            store.migrate(&collection, &id).unwrap();
            prop_assert_eq!(store.get_views(&id).unwrap(), legacy);
            let legacy_key = format!("views/{}/{}", collection, id);
            prop_assert!(store.store.get(&legacy_key).unwrap().is_none());
        }
    }
}
