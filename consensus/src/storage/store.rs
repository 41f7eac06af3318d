//! # Metadata Store
//!
//! A minimal key-value surface over sled. Only well-known metadata keys
//! pass through here; there are no typed accessors because the layout is
//! owned by the syncer, which reads and writes raw fixed-width values.

use std::path::Path;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Errors from the persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying store failed. The message is backend-specific.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Key-value persistence contract.
///
/// `get` returns `Ok(None)` for missing keys — absence is not an error.
/// Writes are best-effort atomic per key; durability of a multi-key
/// sequence is the caller's concern (the syncer orders its writes so a
/// crash mid-sequence is recoverable).
pub trait StateStore: Send + Sync {
    /// Reads a key. Missing keys yield `Ok(None)`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a key, overwriting any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Removes a key. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Sled-backed implementation
// ---------------------------------------------------------------------------

/// Sled-backed metadata store.
///
/// Every write is flushed before returning. The data volume here is
/// three tiny keys written on head changes, so durability wins over
/// write batching.
#[derive(Debug, Clone)]
pub struct MetaStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl MetaStore {
    /// Opens (or creates) a store at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_db(db)
    }

    /// Creates a temporary store that is discarded on drop. For tests.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let tree = db
            .open_tree("consensus_meta")
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db, tree })
    }

    /// Blocks until all pending writes are durable.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl StateStore for MetaStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .tree
            .get(key)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(value.map(|ivec| ivec.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.tree
            .insert(key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.flush()
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.tree
            .remove(key)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_none_not_error() {
        let store = MetaStore::open_temporary().unwrap();
        assert!(store.get(b"nope").unwrap().is_none());
    }

    #[test]
    fn put_get_roundtrip() {
        let store = MetaStore::open_temporary().unwrap();
        store.put(b"key", b"value").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));

        // Overwrite.
        store.put(b"key", b"value2").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value2".to_vec()));
    }

    #[test]
    fn delete_removes_key() {
        let store = MetaStore::open_temporary().unwrap();
        store.put(b"key", b"value").unwrap();
        store.delete(b"key").unwrap();
        assert!(store.get(b"key").unwrap().is_none());

        // Deleting again is fine.
        store.delete(b"key").unwrap();
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = MetaStore::open(dir.path()).unwrap();
            store.put(b"survives", b"yes").unwrap();
        }
        let store = MetaStore::open(dir.path()).unwrap();
        assert_eq!(store.get(b"survives").unwrap(), Some(b"yes".to_vec()));
    }
}
