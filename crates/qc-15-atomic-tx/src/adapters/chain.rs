//! In-memory chain backend: keeps the post-state of every processed block.

use crate::domain::{AtomicTx, ChainBlock, Hash, StateDb};
use crate::ports::ChainBackend;
use parking_lot::RwLock;
use std::collections::HashMap;

struct ProcessedBlock {
    height: u64,
    state: StateDb,
}

pub struct InMemoryChain {
    blocks: RwLock<HashMap<Hash, ProcessedBlock>>,
    last_accepted: RwLock<Hash>,
}

impl InMemoryChain {
    /// Chain containing only `genesis` with `genesis_state`.
    pub fn new(genesis: &ChainBlock, genesis_state: StateDb) -> Self {
        let hash = genesis.hash();
        let mut blocks = HashMap::new();
        blocks.insert(
            hash,
            ProcessedBlock {
                height: genesis.height,
                state: genesis_state,
            },
        );
        Self {
            blocks: RwLock::new(blocks),
            last_accepted: RwLock::new(hash),
        }
    }

    pub fn last_accepted(&self) -> Hash {
        *self.last_accepted.read()
    }
}

impl ChainBackend for InMemoryChain {
    fn has_block(&self, hash: &Hash, height: u64) -> bool {
        self.blocks
            .read()
            .get(hash)
            .is_some_and(|block| block.height == height)
    }

    fn block_state(&self, hash: &Hash) -> Result<StateDb, String> {
        self.blocks
            .read()
            .get(hash)
            .map(|block| block.state.clone())
            .ok_or_else(|| format!("no state for block {}", hex::encode(hash)))
    }

    fn process(
        &self,
        _block: &ChainBlock,
        atomic_tx: Option<&AtomicTx>,
        parent_state: StateDb,
    ) -> Result<StateDb, String> {
        let mut state = parent_state;
        if let Some(tx) = atomic_tx {
            tx.apply_state_transfer(&mut state)
                .map_err(|e| e.to_string())?;
        }
        Ok(state)
    }

    fn insert_chain(&self, block: &ChainBlock, state: StateDb) -> Result<(), String> {
        self.blocks.write().insert(
            block.hash(),
            ProcessedBlock {
                height: block.height,
                state,
            },
        );
        Ok(())
    }

    fn accept(&self, block: &ChainBlock) -> Result<(), String> {
        let hash = block.hash();
        if !self.has_block(&hash, block.height) {
            return Err(format!("cannot accept unprocessed block {}", hex::encode(hash)));
        }
        *self.last_accepted.write() = hash;
        Ok(())
    }
}
