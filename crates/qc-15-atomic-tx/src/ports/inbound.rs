//! # Inbound Ports
//!
//! What the atomic subsystem offers to the consensus driver and to sync peers.

use crate::domain::{BlockError, BlockId, BlockStatus, ChainBlock, Hash, IndexError};
use crate::index::AtomicIndexIterator;

/// Block lifecycle driven by consensus.
///
/// Verify, accept and reject are never retried internally; a failed verify
/// means the caller drops the block.
pub trait AtomicBlockApi: Send + Sync {
    /// Register a block received from a proposer.
    fn add_block(&self, block: ChainBlock) -> Result<BlockId, BlockError>;

    /// Verify a registered block, moving it to `Processing`.
    fn verify(&self, id: &BlockId) -> Result<(), BlockError>;

    /// Accept a processing block.
    fn accept(&self, id: &BlockId) -> Result<(), BlockError>;

    /// Reject a processing block, releasing its atomic tx.
    fn reject(&self, id: &BlockId) -> Result<(), BlockError>;

    /// Status of `id`; `Unknown` if never registered.
    fn status(&self, id: &BlockId) -> BlockStatus;

    fn last_accepted(&self) -> BlockId;
}

/// Read access to the committed atomic index.
pub trait AtomicIndexReader: Send + Sync {
    /// Most recent committed root and the next indexable height.
    fn last_committed(&self) -> Result<(Hash, u64), IndexError>;

    /// Iterate the leaves committed under `root` from `start_height` on.
    fn iterator_from(&self, root: Hash, start_height: u64)
        -> Result<AtomicIndexIterator, IndexError>;
}
