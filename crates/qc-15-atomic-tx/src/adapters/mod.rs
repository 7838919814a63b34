//! # Adapters Layer (Hexagonal Architecture)
//!
//! In-memory implementations of the outbound ports.

mod chain;
mod mempool;
mod shared_memory;
mod storage;

pub use chain::InMemoryChain;
pub use mempool::InMemoryMempool;
pub use shared_memory::InMemorySharedMemory;
pub use storage::{InMemoryKvStore, KvTrieDatabase, PrefixDb};
