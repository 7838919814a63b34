//! Background rebuild of the atomic trie from the operation log.

use super::trie_index::TrieIndex;
use crate::domain::IndexError;
use crate::operation_log::{merge_atomic_ops, parse_height_key, OperationLog};
use crate::ports::KeyValueStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What a finished rebuild processed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RebuildStats {
    pub heights: u64,
    pub transactions: u64,
}

pub(super) struct Rebuild<S> {
    pub(super) trie: Arc<TrieIndex>,
    pub(super) log: Arc<OperationLog<S>>,
    pub(super) progress_interval: Duration,
}

impl<S: KeyValueStore> Rebuild<S> {
    /// Index every logged height from the trie's next height on.
    pub(super) fn run(&self) -> Result<RebuildStats, IndexError> {
        let started = Instant::now();
        let start_height = self.trie.next_height();
        info!("[qc-15] Rebuilding atomic trie from height {}", start_height);

        let mut stats = RebuildStats::default();
        let mut last_progress = Instant::now();

        for (key, value) in self.log.iterate_from(start_height)? {
            // Marker and tx-id entries
            let Some(height) = parse_height_key(&key) else {
                continue;
            };

            let txs = OperationLog::<S>::decode(&value).map_err(|e| IndexError::Rebuild {
                height,
                reason: e.to_string(),
            })?;
            let ops = merge_atomic_ops(&txs).map_err(|e| IndexError::Rebuild {
                height,
                reason: e.to_string(),
            })?;
            self.trie
                .index(height, &ops)
                .map_err(|e| IndexError::Rebuild {
                    height,
                    reason: e.to_string(),
                })?;

            stats.heights += 1;
            stats.transactions += txs.len() as u64;

            if last_progress.elapsed() >= self.progress_interval {
                info!(
                    "[qc-15] Atomic trie rebuild progress: height {}, {} txs indexed",
                    height, stats.transactions
                );
                last_progress = Instant::now();
            } else {
                debug!("[qc-15] Rebuilt atomic trie height {}", height);
            }
        }

        info!(
            "[qc-15] Atomic trie rebuild complete: {} heights, {} txs in {:?}",
            stats.heights,
            stats.transactions,
            started.elapsed()
        );
        Ok(stats)
    }
}
