//! RocksDB-backed [`KeyValueStore`].
//!
//! A single default column family holds every record; the chain engine
//! namespaces keys by prefix byte. Batches map onto a native
//! [`rocksdb::WriteBatch`], so a block connection or a reorg lands on disk
//! atomically.

use std::path::Path;

use rocksdb::{Direction, IteratorMode, Options, DB};

use cairn_core::error::StorageError;
use cairn_core::traits::{KeyValueStore, WriteBatch, WriteOp};

fn backend(e: rocksdb::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// RocksDB-backed persistent storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DB::open(&opts, path.as_ref()).map_err(backend)?;
        Ok(Self { db })
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(backend)
    }

    /// Compact the whole key range.
    pub fn compact(&self) {
        self.db.compact_range::<&[u8], &[u8]>(None, None);
    }
}

impl KeyValueStore for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.db.get(key).map_err(backend)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(key, value).map_err(backend)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.db.delete(key).map_err(backend)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(backend)?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.into_vec(), value.into_vec()));
        }
        Ok(entries)
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut native = rocksdb::WriteBatch::default();
        for op in batch.iter() {
            match op {
                WriteOp::Put { key, value } => native.put(key, value),
                WriteOp::Delete { key } => native.delete(key),
            }
        }
        self.db.write(native).map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (RocksStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("db")).unwrap();
        (store, dir)
    }

    #[test]
    fn put_get_delete() {
        let (store, _dir) = temp_store();
        assert_eq!(store.get(b"k").unwrap(), None);
        store.put(b"k", b"v").unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
        store.delete(b"k").unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn scan_prefix_stops_at_prefix_boundary() {
        let (store, _dir) = temp_store();
        store.put(b"a1", b"x").unwrap();
        store.put(b"b1", b"1").unwrap();
        store.put(b"b2", b"2").unwrap();
        store.put(b"c1", b"y").unwrap();

        let found = store.scan_prefix(b"b").unwrap();
        assert_eq!(
            found,
            vec![(b"b1".to_vec(), b"1".to_vec()), (b"b2".to_vec(), b"2".to_vec())]
        );
        assert!(store.scan_prefix(b"z").unwrap().is_empty());
    }

    #[test]
    fn write_batch_applies_puts_and_deletes() {
        let (store, _dir) = temp_store();
        store.put(b"old", b"1").unwrap();

        let mut batch = WriteBatch::new();
        batch.put(b"new".to_vec(), b"2".to_vec());
        batch.delete(b"old".to_vec());
        store.write_batch(batch).unwrap();

        assert_eq!(store.get(b"new").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"old").unwrap(), None);
    }

    #[test]
    fn flush_and_compact_succeed() {
        let (store, _dir) = temp_store();
        store.put(b"k", b"v").unwrap();
        store.flush().unwrap();
        store.compact();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
