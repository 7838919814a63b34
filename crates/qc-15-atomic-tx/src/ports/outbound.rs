//! # Outbound Ports
//!
//! Collaborators the atomic subsystem drives: the node key-value store, the
//! trie node store, shared cross-chain memory, the mempool and the chain
//! backend that performs ordinary block processing.

use crate::domain::{AtomicOps, AtomicTx, ChainBlock, ChainId, Hash, StateDb, StorageError};
use crate::versiondb::CommitBatch;
use std::sync::Arc;

/// Ordered key/value pairs returned by scans.
pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

/// Abstract interface for key-value database operations.
///
/// Methods take `&self`; implementations synchronize internally so one store
/// can be shared by the block engine, the operation log and the index rebuild.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Put a single key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.
    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// Either every operation is applied or none is.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError>;

    /// All pairs with key >= `start`, in ascending key order.
    fn scan_from(&self, start: &[u8]) -> Result<ScanResult, StorageError>;

    /// All pairs whose key starts with `prefix`, in ascending key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, StorageError> {
        Ok(self
            .scan_from(prefix)?
            .into_iter()
            .take_while(|(k, _)| k.starts_with(prefix))
            .collect())
    }

    /// Check if a key exists.
    fn has(&self, key: &[u8]) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        (**self).delete(key)
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError> {
        (**self).atomic_batch_write(operations)
    }

    fn scan_from(&self, start: &[u8]) -> Result<ScanResult, StorageError> {
        (**self).scan_from(start)
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, StorageError> {
        (**self).prefix_scan(prefix)
    }
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }

    /// Key the operation touches.
    pub fn key(&self) -> &[u8] {
        match self {
            BatchOperation::Put { key, .. } | BatchOperation::Delete { key } => key,
        }
    }
}

/// Content-addressed node store backing the keyed Merkle trie.
pub trait TrieDatabase: Send + Sync {
    fn get_node(&self, hash: &Hash) -> Result<Option<Vec<u8>>, StorageError>;
    fn batch_put(&self, nodes: Vec<(Hash, Vec<u8>)>) -> Result<(), StorageError>;
}

/// Shared cross-chain memory.
///
/// Each peer chain owns a region of elements keyed by UTXO input id.
pub trait SharedMemory: Send + Sync {
    /// Values stored under `keys` in `peer_chain`'s region, positionally.
    fn get(
        &self,
        peer_chain: &ChainId,
        keys: &[Vec<u8>],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError>;

    /// Apply `requests` together with the pending writes held by `batch`.
    ///
    /// Must not call back into the store that issued `batch`: the batch holds
    /// that store's exclusive lock until it is dropped.
    fn apply(&self, requests: &AtomicOps, batch: CommitBatch<'_>) -> Result<(), StorageError>;
}

/// Read-only view of one peer chain's shared memory region.
pub struct SharedMemoryView<'a> {
    memory: &'a dyn SharedMemory,
    chain_id: ChainId,
}

impl<'a> SharedMemoryView<'a> {
    /// Open a view on `chain_id`.
    pub fn open(memory: &'a dyn SharedMemory, chain_id: ChainId) -> Self {
        Self { memory, chain_id }
    }

    /// Chain this view reads.
    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Values stored under `keys`, positionally.
    pub fn get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        self.memory.get(&self.chain_id, keys)
    }
}

/// Mempool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    #[error("Transaction already known")]
    AlreadyKnown,
    #[error("Mempool full: capacity {capacity}")]
    Full { capacity: usize },
}

/// Atomic mempool as seen by the block engine.
pub trait AtomicMempool: Send + Sync {
    /// Admit a transaction for issuance.
    fn add(&self, tx: AtomicTx) -> Result<(), MempoolError>;

    /// Drop a transaction for good (it was accepted).
    fn remove(&self, tx_id: &Hash);

    /// Re-queue a transaction whose block was rejected.
    fn release(&self, tx_id: &Hash);

    /// All transactions matching `predicate`.
    fn query(&self, predicate: &dyn Fn(&AtomicTx) -> bool) -> Vec<AtomicTx>;
}

/// Ordinary chain processing (the EVM side) consumed by the block engine.
pub trait ChainBackend: Send + Sync {
    /// Whether the chain holds block `hash` at `height`.
    fn has_block(&self, hash: &Hash, height: u64) -> bool;

    /// Post-state of block `hash`.
    fn block_state(&self, hash: &Hash) -> Result<StateDb, String>;

    /// Execute `block` on top of `parent_state`, returning the post-state.
    ///
    /// Applies the atomic state transfer of `atomic_tx`, which is where export
    /// nonces and balances are checked.
    fn process(
        &self,
        block: &ChainBlock,
        atomic_tx: Option<&AtomicTx>,
        parent_state: StateDb,
    ) -> Result<StateDb, String>;

    /// Record a processed block and its post-state.
    fn insert_chain(&self, block: &ChainBlock, state: StateDb) -> Result<(), String>;

    /// Mark `block` canonical.
    fn accept(&self, block: &ChainBlock) -> Result<(), String>;
}
