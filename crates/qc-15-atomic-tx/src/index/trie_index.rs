//! The internal index step and commit records.

use super::{INDEX_HEIGHT_KEY, LAST_COMMITTED_KEY, LEAF_KEY_LEN};
use crate::domain::{AtomicOps, Hash, IndexError, MerkleTrie, EMPTY_ROOT};
use crate::ports::{BatchOperation, KeyValueStore, TrieDatabase};
use parking_lot::Mutex;
use shared_types::short_hex;
use std::sync::Arc;
use tracing::info;

struct TrieState {
    trie: MerkleTrie,
    next_height: u64,
}

/// Trie plus commit bookkeeping, shared by callers and the rebuild task.
pub(super) struct TrieIndex {
    meta: Arc<dyn KeyValueStore>,
    trie_db: Arc<dyn TrieDatabase>,
    commit_interval: u64,
    state: Mutex<TrieState>,
}

impl TrieIndex {
    /// Reopen at the last committed root. Heights after the last commit are
    /// not in the trie and are indexed again by the rebuild.
    pub(super) fn open(
        meta: Arc<dyn KeyValueStore>,
        trie_db: Arc<dyn TrieDatabase>,
        commit_interval: u64,
    ) -> Result<Self, IndexError> {
        let (root, next_height) = read_last_committed(meta.as_ref())?;
        let trie = MerkleTrie::open(root, trie_db.clone())?;
        Ok(Self {
            meta,
            trie_db,
            commit_interval,
            state: Mutex::new(TrieState { trie, next_height }),
        })
    }

    pub(super) fn next_height(&self) -> u64 {
        self.state.lock().next_height
    }

    pub(super) fn trie_db(&self) -> Arc<dyn TrieDatabase> {
        self.trie_db.clone()
    }

    /// Root over everything indexed so far, committed or not.
    pub(super) fn working_root(&self) -> Result<Hash, IndexError> {
        self.state.lock().trie.root_hash()
    }

    /// Apply `ops` at `height`; commit when `height` is a multiple of the
    /// interval. Returns the root only when a commit happened.
    pub(super) fn index(&self, height: u64, ops: &AtomicOps) -> Result<Option<Hash>, IndexError> {
        let next = height
            .checked_add(1)
            .ok_or(IndexError::HeightOverflow(height))?;
        let mut state = self.state.lock();

        for (chain_id, requests) in ops {
            let mut key = Vec::with_capacity(LEAF_KEY_LEN);
            key.extend_from_slice(&height.to_be_bytes());
            key.extend_from_slice(chain_id);
            state.trie.update(key, bincode::serialize(requests)?);
        }

        state.next_height = state.next_height.max(next);
        self.meta
            .put(INDEX_HEIGHT_KEY, &state.next_height.to_be_bytes())?;

        if height % self.commit_interval != 0 {
            return Ok(None);
        }

        let root = state.trie.commit()?;
        let height_bytes = height.to_be_bytes().to_vec();
        self.meta.atomic_batch_write(vec![
            BatchOperation::put(height_bytes.clone(), root.to_vec()),
            BatchOperation::put(LAST_COMMITTED_KEY.to_vec(), height_bytes),
        ])?;
        info!(
            "[qc-15] Committed atomic trie at height {}: root {}",
            height,
            short_hex(&root)
        );
        Ok(Some(root))
    }

    pub(super) fn last_committed(&self) -> Result<(Hash, u64), IndexError> {
        read_last_committed(self.meta.as_ref())
    }

    pub(super) fn committed_root(&self, height: u64) -> Result<Option<Hash>, IndexError> {
        match self.meta.get(&height.to_be_bytes())? {
            Some(bytes) => Ok(Some(to_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persisted next indexable height.
    pub(super) fn index_height(&self) -> Result<Option<u64>, IndexError> {
        match self.meta.get(INDEX_HEIGHT_KEY)? {
            Some(bytes) => Ok(Some(to_height(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// `(root, committed height + 1)`, or `(EMPTY_ROOT, 0)` before any commit.
fn read_last_committed(meta: &dyn KeyValueStore) -> Result<(Hash, u64), IndexError> {
    let Some(height_bytes) = meta.get(LAST_COMMITTED_KEY)? else {
        return Ok((EMPTY_ROOT, 0));
    };
    let height = to_height(&height_bytes)?;
    let next = height
        .checked_add(1)
        .ok_or(IndexError::HeightOverflow(height))?;
    let root = meta
        .get(&height_bytes)?
        .ok_or_else(|| IndexError::MissingRoot(format!("height {}", height)))?;
    Ok((to_hash(&root)?, next))
}

fn to_height(bytes: &[u8]) -> Result<u64, IndexError> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| IndexError::MalformedKey { len: bytes.len() })
}

fn to_hash(bytes: &[u8]) -> Result<Hash, IndexError> {
    <Hash>::try_from(bytes)
        .map_err(|_| IndexError::Codec(format!("root of length {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryKvStore, KvTrieDatabase};
    use crate::domain::AtomicRequests;

    fn index(interval: u64) -> TrieIndex {
        let base = Arc::new(InMemoryKvStore::new());
        TrieIndex::open(
            Arc::new(crate::adapters::PrefixDb::new(b"meta", base.clone())),
            Arc::new(KvTrieDatabase::new(crate::adapters::PrefixDb::new(b"trie", base))),
            interval,
        )
        .unwrap()
    }

    fn ops(chain: u8) -> AtomicOps {
        AtomicOps::from([(
            [chain; 32],
            AtomicRequests {
                put_requests: vec![],
                remove_requests: vec![vec![chain]],
            },
        )])
    }

    #[test]
    fn test_commit_only_on_interval() {
        let index = index(4);
        assert!(index.index(0, &ops(1)).unwrap().is_some());
        assert_eq!(index.last_committed().unwrap().1, 1);

        assert!(index.index(3, &ops(1)).unwrap().is_none());
        assert_eq!(index.last_committed().unwrap().1, 1);
        assert_eq!(index.index_height().unwrap(), Some(4));

        let root = index.index(4, &ops(2)).unwrap().unwrap();
        assert_eq!(index.last_committed().unwrap(), (root, 5));
        assert_eq!(index.committed_root(4).unwrap(), Some(root));
        assert_eq!(index.committed_root(3).unwrap(), None);
    }

    #[test]
    fn test_last_height_refused() {
        let index = index(4);
        assert_eq!(
            index.index(u64::MAX, &ops(1)),
            Err(IndexError::HeightOverflow(u64::MAX))
        );
        assert_eq!(index.next_height(), 0);
        assert_eq!(index.index_height().unwrap(), None);
        assert_eq!(index.working_root().unwrap(), EMPTY_ROOT);
    }

    #[test]
    fn test_nothing_committed() {
        let index = index(4);
        assert_eq!(index.last_committed().unwrap(), (EMPTY_ROOT, 0));
        assert_eq!(index.next_height(), 0);
    }
}
