//! Atomic mempool: a pending queue plus the set of transactions currently
//! issued into blocks.

use crate::domain::{AtomicTx, Hash};
use crate::ports::{AtomicMempool, MempoolError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Default maximum number of transactions held.
pub const DEFAULT_MEMPOOL_CAPACITY: usize = 4096;

#[derive(Default)]
struct PoolState {
    txs: HashMap<Hash, AtomicTx>,
    pending: VecDeque<Hash>,
    issued: HashSet<Hash>,
}

pub struct InMemoryMempool {
    state: Mutex<PoolState>,
    capacity: usize,
}

impl Default for InMemoryMempool {
    fn default() -> Self {
        Self::new(DEFAULT_MEMPOOL_CAPACITY)
    }
}

impl InMemoryMempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            capacity,
        }
    }

    /// Hand the oldest pending transaction to a block proposer.
    pub fn next_tx(&self) -> Option<AtomicTx> {
        let mut state = self.state.lock();
        let id = state.pending.pop_front()?;
        state.issued.insert(id);
        state.txs.get(&id).cloned()
    }

    pub fn contains(&self, tx_id: &Hash) -> bool {
        self.state.lock().txs.contains_key(tx_id)
    }

    pub fn is_issued(&self, tx_id: &Hash) -> bool {
        self.state.lock().issued.contains(tx_id)
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AtomicMempool for InMemoryMempool {
    fn add(&self, tx: AtomicTx) -> Result<(), MempoolError> {
        let mut state = self.state.lock();
        let id = tx.id();
        if state.txs.contains_key(&id) {
            return Err(MempoolError::AlreadyKnown);
        }
        if state.txs.len() >= self.capacity {
            return Err(MempoolError::Full {
                capacity: self.capacity,
            });
        }
        state.txs.insert(id, tx);
        state.pending.push_back(id);
        Ok(())
    }

    fn remove(&self, tx_id: &Hash) {
        let mut state = self.state.lock();
        if state.txs.remove(tx_id).is_some() {
            state.pending.retain(|id| id != tx_id);
            state.issued.remove(tx_id);
            debug!("[qc-15] Removed atomic tx {} from mempool", shared_types::short_hex(tx_id));
        }
    }

    fn release(&self, tx_id: &Hash) {
        let mut state = self.state.lock();
        if state.issued.remove(tx_id) {
            state.pending.push_back(*tx_id);
            debug!("[qc-15] Released atomic tx {} back to pending", shared_types::short_hex(tx_id));
        }
    }

    fn query(&self, predicate: &dyn Fn(&AtomicTx) -> bool) -> Vec<AtomicTx> {
        self.state
            .lock()
            .txs
            .values()
            .filter(|tx| predicate(tx))
            .cloned()
            .collect()
    }
}
