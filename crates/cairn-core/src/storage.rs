//! In-memory [`KeyValueStore`] backed by an ordered map.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::StorageError;
use crate::traits::{KeyValueStore, WriteBatch, WriteOp};

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.write().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let guard = self.inner.read();
        Ok(guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Applied under a single write lock, so readers never see half a batch.
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut guard = self.inner.write();
        for op in batch.iter() {
            match op {
                WriteOp::Put { key, value } => {
                    guard.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    guard.remove(key);
                }
            }
        }
        Ok(())
    }
}
