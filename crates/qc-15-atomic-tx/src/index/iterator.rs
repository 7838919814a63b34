//! Iteration over a committed atomic trie.

use super::LEAF_KEY_LEN;
use crate::domain::{AtomicRequests, ChainId, Hash, IndexError, MerkleTrie};
use crate::ports::TrieDatabase;
use std::sync::Arc;

/// One leaf: the requests for `chain_id` at `height`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub height: u64,
    pub chain_id: ChainId,
    pub requests: AtomicRequests,
}

/// Forward iterator over the leaves committed under one root.
///
/// Reads only the node store, so it is unaffected by later indexing and can be
/// restarted by opening it again at the same root.
pub struct AtomicIndexIterator {
    root: Hash,
    entries: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl AtomicIndexIterator {
    pub(super) fn open(
        root: Hash,
        trie_db: Arc<dyn TrieDatabase>,
        start_height: u64,
    ) -> Result<Self, IndexError> {
        let trie = MerkleTrie::open(root, trie_db)?;
        let entries: Vec<_> = trie
            .iter_from(&start_height.to_be_bytes())
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();
        Ok(Self {
            root,
            entries: entries.into_iter(),
        })
    }

    pub fn root(&self) -> Hash {
        self.root
    }
}

impl Iterator for AtomicIndexIterator {
    type Item = Result<IndexEntry, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.entries.next()?;
        Some(decode_entry(&key, &value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

fn decode_entry(key: &[u8], value: &[u8]) -> Result<IndexEntry, IndexError> {
    if key.len() != LEAF_KEY_LEN {
        return Err(IndexError::MalformedKey { len: key.len() });
    }
    let (height_bytes, chain_bytes) = key.split_at(8);
    let height = u64::from_be_bytes(
        height_bytes
            .try_into()
            .map_err(|_| IndexError::MalformedKey { len: key.len() })?,
    );
    let chain_id: ChainId = chain_bytes
        .try_into()
        .map_err(|_| IndexError::MalformedKey { len: key.len() })?;

    Ok(IndexEntry {
        height,
        chain_id,
        requests: bincode::deserialize(value)?,
    })
}
