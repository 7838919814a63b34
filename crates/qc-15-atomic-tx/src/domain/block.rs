//! # Blocks
//!
//! A [`Block`] wraps an underlying chain block, the atomic transaction carried
//! in its extra data (at most one) and its consensus status. Parents are
//! resolved by id through a [`BlockLookup`]; a parent the lookup cannot find is
//! reported as [`ParentRef::Missing`] rather than as an error.

use super::errors::{BlockError, BlockId, Hash};
use super::tx::AtomicTx;
use super::value_objects::BlockStatus;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use shared_types::short_hex;

/// The underlying chain block as produced by the chain backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub parent_hash: Hash,
    pub height: u64,
    pub timestamp: u64,
    /// Encoded atomic transaction, if any.
    pub ext_data: Option<Vec<u8>>,
}

impl ChainBlock {
    pub fn new(parent_hash: Hash, height: u64, timestamp: u64) -> Self {
        Self {
            parent_hash,
            height,
            timestamp,
            ext_data: None,
        }
    }

    /// Attach an atomic transaction.
    pub fn with_atomic_tx(mut self, tx: &AtomicTx) -> Self {
        self.ext_data = Some(tx.bytes().to_vec());
        self
    }

    /// Keccak-256 over the header fields and extra data.
    pub fn hash(&self) -> Hash {
        let mut hasher = Keccak256::new();
        hasher.update(self.parent_hash);
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        match &self.ext_data {
            Some(data) => {
                hasher.update([1u8]);
                hasher.update((data.len() as u64).to_be_bytes());
                hasher.update(data);
            }
            None => hasher.update([0u8]),
        }
        hasher.finalize().into()
    }
}

/// A block as tracked by the atomic engine.
#[derive(Clone, Debug)]
pub struct Block {
    id: BlockId,
    chain_block: ChainBlock,
    atomic_tx: Option<AtomicTx>,
    status: BlockStatus,
}

impl Block {
    /// Wrap a chain block, decoding its atomic transaction.
    pub fn new(chain_block: ChainBlock) -> Result<Self, BlockError> {
        let atomic_tx = match &chain_block.ext_data {
            Some(data) => Some(AtomicTx::decode(data).map_err(BlockError::from_extract)?),
            None => None,
        };
        Ok(Self {
            id: chain_block.hash(),
            chain_block,
            atomic_tx,
            status: BlockStatus::Unknown,
        })
    }

    /// The genesis block, accepted by definition.
    pub fn genesis(chain_block: ChainBlock) -> Result<Self, BlockError> {
        if chain_block.ext_data.is_some() {
            return Err(BlockError::InvalidBlock(
                "genesis block cannot carry an atomic tx".to_string(),
            ));
        }
        Self::accepted(chain_block)
    }

    /// A block already accepted in an earlier run.
    pub fn accepted(chain_block: ChainBlock) -> Result<Self, BlockError> {
        let mut block = Self::new(chain_block)?;
        block.status = BlockStatus::Accepted;
        Ok(block)
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn parent_id(&self) -> BlockId {
        self.chain_block.parent_hash
    }

    pub fn height(&self) -> u64 {
        self.chain_block.height
    }

    pub fn chain_block(&self) -> &ChainBlock {
        &self.chain_block
    }

    pub fn atomic_tx(&self) -> Option<&AtomicTx> {
        self.atomic_tx.as_ref()
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    /// Move to `next`, enforcing the status state machine.
    pub fn set_status(&mut self, next: BlockStatus) -> Result<(), BlockError> {
        if !self.status.can_transition_to(next) {
            return Err(BlockError::InvalidStatusTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Stateless header checks. The atomic tx is checked separately since
    /// bonus blocks are exempt.
    pub fn syntactic_verify(&self) -> Result<(), BlockError> {
        if self.chain_block.height == 0 {
            return Err(BlockError::InvalidBlock(
                "only genesis may have height 0".to_string(),
            ));
        }
        if self.chain_block.parent_hash == self.id {
            return Err(BlockError::InvalidBlock("block is its own parent".to_string()));
        }
        Ok(())
    }
}

/// Result of resolving a block id.
#[derive(Clone, Debug)]
pub enum ParentRef {
    Found(Block),
    /// Unresolvable id. Reports status `Unknown`.
    Missing(BlockId),
}

impl ParentRef {
    pub fn status(&self) -> BlockStatus {
        match self {
            ParentRef::Found(block) => block.status(),
            ParentRef::Missing(_) => BlockStatus::Unknown,
        }
    }

    pub fn id(&self) -> BlockId {
        match self {
            ParentRef::Found(block) => block.id(),
            ParentRef::Missing(id) => *id,
        }
    }

    pub fn short_id(&self) -> String {
        short_hex(&self.id())
    }
}

/// Non-owning block resolution by id.
pub trait BlockLookup {
    fn lookup(&self, id: &BlockId) -> ParentRef;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_covers_ext_data() {
        let plain = ChainBlock::new([1u8; 32], 1, 100);
        let mut with_data = plain.clone();
        with_data.ext_data = Some(vec![]);
        assert_ne!(plain.hash(), with_data.hash());
    }

    #[test]
    fn test_genesis_is_accepted() {
        let genesis = Block::genesis(ChainBlock::new([0u8; 32], 0, 0)).unwrap();
        assert_eq!(genesis.status(), BlockStatus::Accepted);
    }

    #[test]
    fn test_status_machine_enforced() {
        let mut block = Block::new(ChainBlock::new([1u8; 32], 1, 1)).unwrap();
        assert!(block.set_status(BlockStatus::Accepted).is_err());
        block.set_status(BlockStatus::Processing).unwrap();
        block.set_status(BlockStatus::Rejected).unwrap();
        assert!(block.set_status(BlockStatus::Accepted).is_err());
    }

    #[test]
    fn test_garbage_ext_data_is_invalid() {
        let mut chain_block = ChainBlock::new([1u8; 32], 1, 1);
        chain_block.ext_data = Some(vec![0xFF; 3]);
        assert!(matches!(
            Block::new(chain_block),
            Err(BlockError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_missing_parent_reports_unknown() {
        let parent = ParentRef::Missing([3u8; 32]);
        assert_eq!(parent.status(), BlockStatus::Unknown);
        assert_eq!(parent.id(), [3u8; 32]);
    }
}
