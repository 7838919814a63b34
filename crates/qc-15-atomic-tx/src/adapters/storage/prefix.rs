//! Namespaced view over another store.

use crate::domain::StorageError;
use crate::ports::{BatchOperation, KeyValueStore, ScanResult};

/// Every key is stored as `prefix || key`; scans strip the prefix again.
pub struct PrefixDb<S> {
    prefix: Vec<u8>,
    inner: S,
}

impl<S: KeyValueStore> PrefixDb<S> {
    pub fn new(prefix: &[u8], inner: S) -> Self {
        Self {
            prefix: prefix.to_vec(),
            inner,
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

impl<S: KeyValueStore> KeyValueStore for PrefixDb<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(&self.full_key(key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(&self.full_key(key), value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.delete(&self.full_key(key))
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError> {
        let operations = operations
            .into_iter()
            .map(|op| match op {
                BatchOperation::Put { key, value } => BatchOperation::put(self.full_key(&key), value),
                BatchOperation::Delete { key } => BatchOperation::delete(self.full_key(&key)),
            })
            .collect();
        self.inner.atomic_batch_write(operations)
    }

    fn scan_from(&self, start: &[u8]) -> Result<ScanResult, StorageError> {
        let prefix_len = self.prefix.len();
        Ok(self
            .inner
            .scan_from(&self.full_key(start))?
            .into_iter()
            .take_while(|(k, _)| k.starts_with(&self.prefix))
            .map(|(k, v)| (k[prefix_len..].to_vec(), v))
            .collect())
    }
}
