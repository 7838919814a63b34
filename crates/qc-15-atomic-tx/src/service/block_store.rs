//! Blocks known to the engine, by id.

use crate::domain::{Block, BlockError, BlockId, BlockLookup, BlockStatus, ParentRef};
use parking_lot::RwLock;
use shared_types::short_hex;
use std::collections::HashMap;

pub struct BlockStore {
    blocks: RwLock<HashMap<BlockId, Block>>,
}

impl BlockStore {
    pub fn new(genesis: Block) -> Self {
        let mut blocks = HashMap::new();
        blocks.insert(genesis.id(), genesis);
        Self {
            blocks: RwLock::new(blocks),
        }
    }

    pub fn insert(&self, block: Block) -> Result<(), BlockError> {
        let mut blocks = self.blocks.write();
        if blocks.contains_key(&block.id()) {
            return Err(BlockError::DuplicateBlock(short_hex(&block.id())));
        }
        blocks.insert(block.id(), block);
        Ok(())
    }

    pub fn get(&self, id: &BlockId) -> Result<Block, BlockError> {
        self.blocks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| BlockError::UnknownBlock(short_hex(id)))
    }

    pub fn status(&self, id: &BlockId) -> BlockStatus {
        self.blocks
            .read()
            .get(id)
            .map_or(BlockStatus::Unknown, Block::status)
    }

    pub fn set_status(&self, id: &BlockId, status: BlockStatus) -> Result<(), BlockError> {
        self.blocks
            .write()
            .get_mut(id)
            .ok_or_else(|| BlockError::UnknownBlock(short_hex(id)))?
            .set_status(status)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockLookup for BlockStore {
    fn lookup(&self, id: &BlockId) -> ParentRef {
        match self.blocks.read().get(id) {
            Some(block) => ParentRef::Found(block.clone()),
            None => ParentRef::Missing(*id),
        }
    }
}
