//! # Domain Module
//!
//! Atomic transactions, blocks, the ancestor conflict walk and the keyed
//! Merkle trie. Nothing here performs I/O except through port traits.

pub mod block;
pub mod conflicts;
pub mod errors;
pub mod export_tx;
pub mod import_tx;
pub mod state;
pub mod trie;
pub mod tx;
pub mod value_objects;

pub use block::{Block, BlockLookup, ChainBlock, ParentRef};
pub use conflicts::check_ancestor_conflicts;
pub use errors::*;
pub use export_tx::{EvmInput, TransferableOutput, UnsignedExportTx};
pub use import_tx::{EvmOutput, TransferableInput, UnsignedImportTx};
pub use state::StateDb;
pub use trie::{MerkleTrie, EMPTY_ROOT};
pub use tx::{
    address_of, AtomicTx, AtomicTxBody, Credential, FlowChecker, UnsignedAtomicTx, VerifyContext,
    CODEC_VERSION, EXPORT_TX_TYPE, IMPORT_TX_TYPE,
};
pub use value_objects::*;
