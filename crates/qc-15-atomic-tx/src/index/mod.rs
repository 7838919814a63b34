//! # Atomic Index
//!
//! Verifiable map `(height, destination chain) -> operation set`, committed
//! every `commit_interval` heights so sync peers can iterate it at a root.
//!
//! ## Persisted layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `IndexHeight` | next indexable height (u64 big-endian) |
//! | `LastCommittedBlock` | last committed height (u64 big-endian) |
//! | height (8 bytes) | root committed at that height |
//!
//! Trie leaves are keyed `height (8) ∥ chain id (32)` and hold the bincode
//! `AtomicRequests` for that chain.

mod atomic_index;
mod iterator;
mod phase;
mod rebuild;
mod trie_index;

pub use atomic_index::AtomicIndex;
pub use iterator::{AtomicIndexIterator, IndexEntry};
pub use phase::Phase;
pub use rebuild::RebuildStats;

/// Key of the next indexable height.
pub const INDEX_HEIGHT_KEY: &[u8] = b"IndexHeight";

/// Key of the last committed height.
pub const LAST_COMMITTED_KEY: &[u8] = b"LastCommittedBlock";

/// Length of a trie leaf key.
pub const LEAF_KEY_LEN: usize = 8 + 32;
