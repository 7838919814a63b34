//! # Atomic Engine
//!
//! Block verify/accept/reject as it pertains to atomic transactions.
//!
//! ## Verify
//!
//! 1. Stateless block checks
//! 2. Parent must be known and not rejected
//! 3. Atomic tx (skipped for bonus blocks): ancestor conflict walk for
//!    imports, then semantic verification
//! 4. Normal processing against the parent's state
//!
//! ## Accept
//!
//! Only a child of the last accepted block can be accepted. Acceptance runs
//! inside a commit section of the versioned database. With an atomic tx the
//! tx leaves the mempool and enters the operation log; unless the block is a
//! bonus block its operation set is applied to shared memory in the same
//! batch as the staged writes. The index is fed after the batch is released.
//!
//! The last accepted block is persisted with its pointer, so a restarted
//! engine can resolve it as a parent.

mod block_store;

#[cfg(test)]
mod tests;

pub use block_store::BlockStore;

use crate::adapters::{KvTrieDatabase, PrefixDb};
use crate::domain::{
    check_ancestor_conflicts, AtomicConfig, AtomicOps, AtomicTxError, Block, BlockError, BlockId,
    BlockLookup, BlockStatus, ChainBlock, IndexError, ParentRef, VerifyContext,
};
use crate::index::{AtomicIndex, AtomicIndexIterator};
use crate::operation_log::OperationLog;
use crate::ports::{
    AtomicBlockApi, AtomicIndexReader, AtomicMempool, ChainBackend, KeyValueStore, SharedMemory,
};
use crate::versiondb::VersionDb;
use parking_lot::RwLock;
use shared_types::{short_hex, Hash};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Namespace of the last-accepted pointer.
pub const ACCEPTED_PREFIX: &[u8] = b"acceptedBlocks:";
/// Namespace of the operation log.
pub const OPERATION_LOG_PREFIX: &[u8] = b"atomicTxDB:";
/// Namespace of the index commit records.
pub const INDEX_META_PREFIX: &[u8] = b"atomicTrieMeta:";
/// Namespace of the trie nodes.
pub const TRIE_NODE_PREFIX: &[u8] = b"atomicTrie:";

/// Key of the last accepted block id.
pub const LAST_ACCEPTED_KEY: &[u8] = b"lastAccepted";
/// Key of the encoded last accepted block.
pub const LAST_ACCEPTED_BLOCK_KEY: &[u8] = b"lastAcceptedBlock";

/// Store the operation log writes through.
pub type LogStore<S> = PrefixDb<Arc<VersionDb<Arc<S>>>>;

/// Dependencies for AtomicEngine
pub struct AtomicDependencies<S, M, C, SM> {
    /// Node key-value store.
    pub store: Arc<S>,
    pub mempool: Arc<M>,
    pub chain: Arc<C>,
    pub shared_memory: Arc<SM>,
    pub config: AtomicConfig,
}

pub struct AtomicEngine<S, M, C, SM>
where
    S: KeyValueStore + 'static,
    M: AtomicMempool,
    C: ChainBackend,
    SM: SharedMemory,
{
    config: AtomicConfig,
    db: Arc<VersionDb<Arc<S>>>,
    accepted_db: LogStore<S>,
    op_log: Arc<OperationLog<LogStore<S>>>,
    index: AtomicIndex,
    blocks: BlockStore,
    last_accepted: RwLock<BlockId>,
    mempool: Arc<M>,
    chain: Arc<C>,
    shared_memory: Arc<SM>,
}

impl<S, M, C, SM> AtomicEngine<S, M, C, SM>
where
    S: KeyValueStore + 'static,
    M: AtomicMempool,
    C: ChainBackend,
    SM: SharedMemory,
{
    /// Create an engine whose chain starts at `genesis`.
    pub fn new(
        deps: AtomicDependencies<S, M, C, SM>,
        genesis: ChainBlock,
    ) -> Result<Self, BlockError> {
        deps.config.validate().map_err(BlockError::Config)?;

        let db = Arc::new(VersionDb::new(deps.store.clone()));
        let accepted_db = PrefixDb::new(ACCEPTED_PREFIX, db.clone());
        let op_log = OperationLog::open(PrefixDb::new(OPERATION_LOG_PREFIX, db.clone()))?;
        db.commit()?;

        let meta: Arc<dyn KeyValueStore> =
            Arc::new(PrefixDb::new(INDEX_META_PREFIX, deps.store.clone()));
        let trie_db = Arc::new(KvTrieDatabase::new(PrefixDb::new(
            TRIE_NODE_PREFIX,
            deps.store.clone(),
        )));
        let index = AtomicIndex::new(meta, trie_db, &deps.config)?;

        let genesis = Block::genesis(genesis)?;
        let genesis_id = genesis.id();
        let blocks = BlockStore::new(genesis);
        let last_accepted = match load_last_accepted(&accepted_db)? {
            Some(block) if block.id() != genesis_id => {
                if !deps.chain.has_block(&block.id(), block.height()) {
                    warn!(
                        "[qc-15] Chain backend has no state for last accepted block {}",
                        short_hex(&block.id())
                    );
                }
                let id = block.id();
                blocks.insert(block)?;
                id
            }
            _ => genesis_id,
        };

        info!(
            "[qc-15] Atomic engine ready: last accepted {}, commit interval {}",
            short_hex(&last_accepted),
            deps.config.commit_interval
        );

        Ok(Self {
            config: deps.config,
            db,
            accepted_db,
            op_log: Arc::new(op_log),
            index,
            blocks,
            last_accepted: RwLock::new(last_accepted),
            mempool: deps.mempool,
            chain: deps.chain,
            shared_memory: deps.shared_memory,
        })
    }

    /// Start rebuilding the atomic index from the operation log.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize_index<F>(&self, finalize: F) -> oneshot::Receiver<Result<(), IndexError>>
    where
        F: FnOnce() -> Result<(), IndexError> + Send + 'static,
    {
        self.index.initialize(self.op_log.clone(), finalize)
    }

    pub fn config(&self) -> &AtomicConfig {
        &self.config
    }

    pub fn index(&self) -> &AtomicIndex {
        &self.index
    }

    pub fn operation_log(&self) -> &OperationLog<LogStore<S>> {
        &self.op_log
    }

    pub fn get_block(&self, id: &BlockId) -> Result<Block, BlockError> {
        self.blocks.get(id)
    }

    /// Last accepted id as persisted in the store.
    pub fn persisted_last_accepted(&self) -> Result<Option<BlockId>, BlockError> {
        Ok(self
            .accepted_db
            .get(LAST_ACCEPTED_KEY)?
            .and_then(|bytes| bytes.as_slice().try_into().ok()))
    }

    fn verify_block(&self, block: &Block) -> Result<(), BlockError> {
        block.syntactic_verify()?;

        let parent = match self.blocks.lookup(&block.parent_id()) {
            ParentRef::Found(parent)
                if !matches!(parent.status(), BlockStatus::Unknown | BlockStatus::Rejected) =>
            {
                parent
            }
            _ => {
                warn!(
                    "[qc-15] Block {} has unknown or rejected parent {}",
                    short_hex(&block.id()),
                    short_hex(&block.parent_id())
                );
                return Err(BlockError::RejectedParent(short_hex(&block.parent_id())));
            }
        };
        if parent.height() + 1 != block.height() {
            return Err(BlockError::InvalidBlock(format!(
                "height {} does not follow parent height {}",
                block.height(),
                parent.height()
            )));
        }

        if let Some(tx) = block.atomic_tx() {
            if self.config.is_bonus_block(&block.id()) {
                info!(
                    "[qc-15] Skipping atomic tx verification on bonus block {}",
                    short_hex(&block.id())
                );
            } else {
                tx.verify(&self.config)
                    .map_err(|e| BlockError::InvalidBlock(e.to_string()))?;
                if tx.is_import() {
                    check_ancestor_conflicts(&self.blocks, &block.parent_id(), &tx.consumed_inputs())
                        .inspect_err(|e| warn!("[qc-15] {}", e))?;
                }
                let ctx = VerifyContext {
                    config: &self.config,
                    shared_memory: self.shared_memory.as_ref(),
                };
                tx.semantic_verify(&ctx)
                    .map_err(|source| BlockError::SemanticVerify {
                        height: block.height(),
                        source,
                    })?;
            }
        }

        let parent_state = self
            .chain
            .block_state(&parent.id())
            .map_err(BlockError::Processing)?;
        let state = self
            .chain
            .process(block.chain_block(), block.atomic_tx(), parent_state)
            .map_err(BlockError::Processing)?;
        self.chain
            .insert_chain(block.chain_block(), state)
            .map_err(BlockError::Processing)
    }

    /// Commit the block's writes. Returns the operation set to index, or
    /// `None` for bonus blocks.
    fn commit_accepted(&self, block: &Block) -> Result<Option<AtomicOps>, BlockError> {
        let bonus = self.config.is_bonus_block(&block.id());
        let mut section = self.db.start_commit()?;

        self.accepted_db.put(LAST_ACCEPTED_KEY, &block.id())?;
        self.accepted_db
            .put(LAST_ACCEPTED_BLOCK_KEY, &bincode::serialize(block.chain_block())?)?;
        self.chain
            .accept(block.chain_block())
            .map_err(BlockError::Chain)?;

        let Some(tx) = block.atomic_tx() else {
            section.commit()?;
            return Ok((!bonus).then(AtomicOps::new));
        };

        self.mempool.remove(&tx.id());
        self.op_log
            .write(block.height(), std::slice::from_ref(tx))?;

        if bonus {
            info!(
                "[qc-15] Skipping atomic tx acceptance on bonus block {}",
                short_hex(&block.id())
            );
            section.commit()?;
            return Ok(None);
        }

        // No store calls from here until the batch is consumed
        let batch = section.commit_batch()?;
        let ops = tx
            .accept(self.shared_memory.as_ref(), batch)
            .map_err(|e| match e {
                AtomicTxError::SharedMemory(reason) => BlockError::SharedMemory(reason),
                other => BlockError::InvalidBlock(other.to_string()),
            })?;
        Ok(Some(ops))
    }
}

/// The persisted last accepted block, checked against its pointer.
fn load_last_accepted<S: KeyValueStore>(
    accepted_db: &LogStore<S>,
) -> Result<Option<Block>, BlockError> {
    let Some(pointer) = accepted_db.get(LAST_ACCEPTED_KEY)? else {
        return Ok(None);
    };
    let corrupt = || BlockError::InvalidBlock("corrupt last accepted block".to_string());

    let id: BlockId = pointer.as_slice().try_into().map_err(|_| corrupt())?;
    let encoded = accepted_db.get(LAST_ACCEPTED_BLOCK_KEY)?.ok_or_else(corrupt)?;
    let block = Block::accepted(bincode::deserialize(&encoded)?)?;
    if block.id() != id {
        return Err(corrupt());
    }
    Ok(Some(block))
}

impl<S, M, C, SM> AtomicBlockApi for AtomicEngine<S, M, C, SM>
where
    S: KeyValueStore + 'static,
    M: AtomicMempool,
    C: ChainBackend,
    SM: SharedMemory,
{
    fn add_block(&self, chain_block: ChainBlock) -> Result<BlockId, BlockError> {
        let block = Block::new(chain_block)?;
        let id = block.id();
        self.blocks.insert(block)?;
        Ok(id)
    }

    fn verify(&self, id: &BlockId) -> Result<(), BlockError> {
        let block = self.blocks.get(id)?;
        if block.status() != BlockStatus::Unknown {
            return Err(BlockError::InvalidStatusTransition {
                from: block.status(),
                to: BlockStatus::Processing,
            });
        }

        debug!(
            "[qc-15] Verifying block {} at height {}",
            short_hex(id),
            block.height()
        );
        self.verify_block(&block)?;
        self.blocks.set_status(id, BlockStatus::Processing)
    }

    fn accept(&self, id: &BlockId) -> Result<(), BlockError> {
        let block = self.blocks.get(id)?;
        if block.status() != BlockStatus::Processing {
            return Err(BlockError::InvalidStatusTransition {
                from: block.status(),
                to: BlockStatus::Accepted,
            });
        }

        // Held until the index is fed, so accepts are applied in chain order
        let mut last_accepted = self.last_accepted.write();
        if block.parent_id() != *last_accepted {
            return Err(BlockError::NotLastAcceptedChild {
                parent: short_hex(&block.parent_id()),
                last_accepted: short_hex(&last_accepted),
            });
        }

        debug!(
            "[qc-15] Accepting block {} at height {}",
            short_hex(id),
            block.height()
        );
        let ops = self.commit_accepted(&block)?;
        self.blocks.set_status(id, BlockStatus::Accepted)?;
        *last_accepted = *id;

        if let Some(ops) = ops {
            self.index.index(block.height(), ops)?;
        }
        Ok(())
    }

    fn reject(&self, id: &BlockId) -> Result<(), BlockError> {
        let block = self.blocks.get(id)?;
        debug!(
            "[qc-15] Rejecting block {} at height {}",
            short_hex(id),
            block.height()
        );
        self.blocks.set_status(id, BlockStatus::Rejected)?;

        if let Some(tx) = block.atomic_tx() {
            self.mempool.release(&tx.id());
        }
        Ok(())
    }

    fn status(&self, id: &BlockId) -> BlockStatus {
        self.blocks.status(id)
    }

    fn last_accepted(&self) -> BlockId {
        *self.last_accepted.read()
    }
}

impl<S, M, C, SM> AtomicIndexReader for AtomicEngine<S, M, C, SM>
where
    S: KeyValueStore + 'static,
    M: AtomicMempool,
    C: ChainBackend,
    SM: SharedMemory,
{
    fn last_committed(&self) -> Result<(Hash, u64), IndexError> {
        self.index.last_committed()
    }

    fn iterator_from(
        &self,
        root: Hash,
        start_height: u64,
    ) -> Result<AtomicIndexIterator, IndexError> {
        self.index.iterator_from(root, start_height)
    }
}
