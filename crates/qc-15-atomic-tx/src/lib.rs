//! # QC-15 Atomic Transactions
//!
//! Cross-chain import/export transactions and the atomic index.
//!
//! **Subsystem ID:** 15
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Move assets between this chain and its peers through shared memory:
//! - Import transactions consume UTXOs a peer chain left in shared memory
//! - Export transactions debit accounts here and leave UTXOs for the peer
//! - Block acceptance applies each block's operation set to shared memory in
//!   the same batch as the block's own writes
//! - The atomic index commits every height's operation set to a Merkle trie
//!   at a fixed stride, for state sync
//!
//! ## Safety Properties
//!
//! | Property | Enforced by |
//! |----------|-------------|
//! | No double import on a fork | [`domain::check_ancestor_conflicts`] |
//! | Block writes and cross-chain requests land together | [`versiondb::CommitBatch`] |
//! | Index never ahead of the operation log | [`index::AtomicIndex`] fed after commit |
//! | Interrupted indexing recovers | rebuild from [`operation_log::OperationLog`] |
//!
//! ## Module Structure
//!
//! ```text
//! qc-15-atomic-tx/
//! ├── domain/          # Transactions, blocks, conflict walk, Merkle trie
//! ├── ports/           # AtomicBlockApi, KeyValueStore, SharedMemory, ...
//! ├── adapters/        # In-memory stores, mempool, chain, shared memory
//! ├── versiondb.rs     # Staged writes with commit sections
//! ├── operation_log.rs # Accepted atomic txs by height
//! ├── index/           # Atomic index, rebuild, iterator
//! └── service/         # AtomicEngine (verify / accept / reject)
//! ```

#![warn(clippy::all)]

pub mod adapters;
pub mod domain;
pub mod index;
pub mod operation_log;
pub mod ports;
pub mod service;
pub mod versiondb;

// Re-exports
pub use adapters::{
    InMemoryChain, InMemoryKvStore, InMemoryMempool, InMemorySharedMemory, KvTrieDatabase,
    PrefixDb,
};
pub use domain::{
    AtomicConfig, AtomicOps, AtomicRequests, AtomicTx, AtomicTxError, Block, BlockError,
    BlockStatus, ChainBlock, Element, IndexError, MerkleTrie, UnsignedAtomicTx,
    UnsignedExportTx, UnsignedImportTx, EMPTY_ROOT,
};
pub use index::{AtomicIndex, AtomicIndexIterator, IndexEntry};
pub use operation_log::OperationLog;
pub use ports::{
    AtomicBlockApi, AtomicIndexReader, AtomicMempool, ChainBackend, KeyValueStore, SharedMemory,
    TrieDatabase,
};
pub use service::{AtomicDependencies, AtomicEngine};
pub use versiondb::VersionDb;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
