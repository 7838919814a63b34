//! Public face of the atomic index: buffered catch-up while the rebuild runs,
//! direct indexing afterwards.

use super::iterator::AtomicIndexIterator;
use super::phase::Phase;
use super::rebuild::Rebuild;
use super::trie_index::TrieIndex;
use crate::domain::{AtomicConfig, AtomicOps, Hash, IndexError};
use crate::operation_log::OperationLog;
use crate::ports::{KeyValueStore, TrieDatabase};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

type Outcome = Arc<Mutex<Option<Result<(), IndexError>>>>;

pub struct AtomicIndex {
    trie: Arc<TrieIndex>,
    phase: Mutex<Phase>,
    outcome: Outcome,
    started: AtomicBool,
    progress_interval: Duration,
}

impl AtomicIndex {
    /// Open at the last committed root, or empty if nothing was committed.
    ///
    /// The index buffers every [`index`](Self::index) call until the rebuild
    /// launched by [`initialize`](Self::initialize) has completed.
    pub fn new(
        meta: Arc<dyn KeyValueStore>,
        trie_db: Arc<dyn TrieDatabase>,
        config: &AtomicConfig,
    ) -> Result<Self, IndexError> {
        let trie = TrieIndex::open(meta, trie_db, config.commit_interval)?;
        Ok(Self {
            trie: Arc::new(trie),
            phase: Mutex::new(Phase::default()),
            outcome: Arc::new(Mutex::new(None)),
            started: AtomicBool::new(false),
            progress_interval: Duration::from_secs(config.rebuild_progress_interval_secs),
        })
    }

    /// Launch the rebuild from `log` on the blocking pool.
    ///
    /// `finalize` runs once after the last logged height is indexed. The
    /// returned signal carries the rebuild outcome. Must be called from
    /// within a Tokio runtime.
    pub fn initialize<S, F>(
        &self,
        log: Arc<OperationLog<S>>,
        finalize: F,
    ) -> oneshot::Receiver<Result<(), IndexError>>
    where
        S: KeyValueStore + 'static,
        F: FnOnce() -> Result<(), IndexError> + Send + 'static,
    {
        let (signal, receiver) = oneshot::channel();
        if self.started.swap(true, Ordering::AcqRel) {
            let _ = signal.send(Err(IndexError::AlreadyInitialized));
            return receiver;
        }

        let rebuild = Rebuild {
            trie: self.trie.clone(),
            log,
            progress_interval: self.progress_interval,
        };
        let outcome = self.outcome.clone();

        tokio::task::spawn_blocking(move || {
            let result = rebuild
                .run()
                .and_then(|_| finalize().map_err(|e| IndexError::Finalize(e.to_string())));
            if let Err(e) = &result {
                error!("[qc-15] Atomic trie rebuild failed: {}", e);
            }
            *outcome.lock() = Some(result.clone());
            // The caller may have dropped the receiver
            let _ = signal.send(result);
        });
        receiver
    }

    /// Index the operation set accepted at `height`.
    ///
    /// Buffered until the rebuild outcome is observed. The first call after
    /// that drains the buffer, then indexes `height`. Returns the new root when
    /// `height` triggered a commit.
    pub fn index(&self, height: u64, ops: AtomicOps) -> Result<Option<Hash>, IndexError> {
        let mut phase = self.phase.lock();

        if let Phase::Rebuilding { .. } = *phase {
            match self.outcome.lock().clone() {
                None => {
                    debug!("[qc-15] Buffering atomic ops at height {} during rebuild", height);
                    return phase.buffer(height, ops).map(|_| None);
                }
                Some(Err(e)) => return Err(IndexError::RebuildFailed(e.to_string())),
                Some(Ok(())) => {
                    info!(
                        "[qc-15] Rebuild complete, draining {} buffered heights",
                        phase.buffered()
                    );
                    phase.begin_drain();
                }
            }
        }

        let triggered_drain = !phase.is_steady();
        if triggered_drain {
            phase.drain(|h, buffered| self.trie.index(h, buffered).map(|_| ()))?;
        }

        // The rebuild may already have read the triggering height from the log
        let next = self.trie.next_height();
        if !triggered_drain && height < next {
            return Err(IndexError::NonIncreasingHeight { height, next });
        }
        self.trie.index(height, &ops)
    }

    /// Most recent committed root and the next indexable height.
    pub fn last_committed(&self) -> Result<(Hash, u64), IndexError> {
        self.trie.last_committed()
    }

    /// Root committed at `height`, if `height` was a commit height.
    pub fn committed_root(&self, height: u64) -> Result<Option<Hash>, IndexError> {
        self.trie.committed_root(height)
    }

    /// Persisted next indexable height.
    pub fn index_height(&self) -> Result<Option<u64>, IndexError> {
        self.trie.index_height()
    }

    /// Root over everything indexed so far, including uncommitted heights.
    pub fn working_root(&self) -> Result<Hash, IndexError> {
        self.trie.working_root()
    }

    pub fn iterator(&self, root: Hash) -> Result<AtomicIndexIterator, IndexError> {
        self.iterator_from(root, 0)
    }

    pub fn iterator_from(
        &self,
        root: Hash,
        start_height: u64,
    ) -> Result<AtomicIndexIterator, IndexError> {
        AtomicIndexIterator::open(root, self.trie.trie_db(), start_height)
    }

    pub fn phase_name(&self) -> &'static str {
        self.phase.lock().name()
    }

    pub fn buffered_heights(&self) -> usize {
        self.phase.lock().buffered()
    }
}
