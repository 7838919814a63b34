//! Trie node store on top of a key-value store.

use crate::domain::{Hash, StorageError};
use crate::ports::{BatchOperation, KeyValueStore, TrieDatabase};

pub struct KvTrieDatabase<S> {
    store: S,
}

impl<S: KeyValueStore> KvTrieDatabase<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> TrieDatabase for KvTrieDatabase<S> {
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StorageError> {
        self.store.get(hash)
    }

    fn batch_put(&self, nodes: Vec<(Hash, Vec<u8>)>) -> Result<(), StorageError> {
        let operations = nodes
            .into_iter()
            .map(|(hash, bytes)| BatchOperation::put(hash.to_vec(), bytes))
            .collect();
        self.store.atomic_batch_write(operations)
    }
}
