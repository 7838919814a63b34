//! # Keyed Merkle Trie
//!
//! Ordered key/value map whose root commits to every entry.
//!
//! ## Structure
//!
//! ```text
//! leaf_hash = keccak256(0x00 || bincode(LeafNode { key, value }))
//! node_hash = keccak256(0x01 || left || right)
//! root      = binary tree over leaf hashes in key order,
//!             padded with ZERO_HASH to a power of two
//! ```
//!
//! On commit every leaf is stored under its hash and a root node listing the
//! leaf hashes is stored under the root. Opening at a root reloads the leaves
//! from the node store, so a trie can be reopened at any committed root.

use super::errors::{Hash, IndexError};
use crate::ports::TrieDatabase;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use shared_types::{short_hex, ZERO_HASH};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Root of the trie with no entries.
pub const EMPTY_ROOT: Hash = ZERO_HASH;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

#[derive(Serialize, Deserialize)]
struct LeafNode {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct RootNode {
    leaves: Vec<Hash>,
}

pub struct MerkleTrie {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    db: Arc<dyn TrieDatabase>,
}

impl MerkleTrie {
    /// A trie with no entries.
    pub fn empty(db: Arc<dyn TrieDatabase>) -> Self {
        Self {
            entries: BTreeMap::new(),
            db,
        }
    }

    /// Reopen the trie committed under `root`.
    pub fn open(root: Hash, db: Arc<dyn TrieDatabase>) -> Result<Self, IndexError> {
        if root == EMPTY_ROOT {
            return Ok(Self::empty(db));
        }

        let root_bytes = db
            .get_node(&root)?
            .ok_or_else(|| IndexError::MissingRoot(short_hex(&root)))?;
        let root_node: RootNode = bincode::deserialize(&root_bytes)?;

        let mut entries = BTreeMap::new();
        for leaf_hash in root_node.leaves {
            let bytes = db
                .get_node(&leaf_hash)?
                .ok_or_else(|| IndexError::MissingNode(short_hex(&leaf_hash)))?;
            let leaf: LeafNode = bincode::deserialize(&bytes)?;
            entries.insert(leaf.key, leaf.value);
        }

        Ok(Self { entries, db })
    }

    pub fn update(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Root over the current entries, committed or not.
    pub fn root_hash(&self) -> Result<Hash, IndexError> {
        let (_, leaf_hashes) = self.encode_leaves()?;
        Ok(merkle_root(leaf_hashes))
    }

    /// Persist every node and return the root.
    pub fn commit(&self) -> Result<Hash, IndexError> {
        let (mut nodes, leaf_hashes) = self.encode_leaves()?;
        if leaf_hashes.is_empty() {
            return Ok(EMPTY_ROOT);
        }

        let root = merkle_root(leaf_hashes.clone());
        let root_node = bincode::serialize(&RootNode {
            leaves: leaf_hashes,
        })?;
        nodes.push((root, root_node));
        self.db.batch_put(nodes)?;
        Ok(root)
    }

    /// Entries with key >= `start`, in key order.
    pub fn iter_from<'a>(
        &'a self,
        start: &[u8],
    ) -> impl Iterator<Item = (&'a [u8], &'a [u8])> + 'a {
        self.entries
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    fn encode_leaves(&self) -> Result<(Vec<(Hash, Vec<u8>)>, Vec<Hash>), IndexError> {
        let mut nodes = Vec::with_capacity(self.entries.len() + 1);
        let mut hashes = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let bytes = bincode::serialize(&LeafNode {
                key: key.clone(),
                value: value.clone(),
            })?;
            let hash = tagged_hash(LEAF_PREFIX, &[&bytes]);
            hashes.push(hash);
            nodes.push((hash, bytes));
        }
        Ok((nodes, hashes))
    }
}

fn tagged_hash(tag: u8, parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update([tag]);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn merkle_root(mut level: Vec<Hash>) -> Hash {
    if level.is_empty() {
        return EMPTY_ROOT;
    }
    let width = level.len().next_power_of_two().max(2);
    level.resize(width, ZERO_HASH);

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| tagged_hash(NODE_PREFIX, &[&pair[0], &pair[1]]))
            .collect();
    }
    level[0]
}
