//! Key-value storage adapters.

mod memory;
mod prefix;
mod trie_db;

pub use memory::InMemoryKvStore;
pub use prefix::PrefixDb;
pub use trie_db::KvTrieDatabase;
