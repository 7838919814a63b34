//! # Domain Errors
//!
//! Error types for the atomic transaction subsystem.
//!
//! | Family | Type | Retry |
//! |--------|------|-------|
//! | Validation | [`AtomicTxError`], [`BlockError::InvalidBlock`] | never, block rejected |
//! | Conflict | [`BlockError::ConflictingAtomicInputs`] | never, block rejected |
//! | Unknown tx type | [`BlockError::UnknownTxType`] | fatal to verification |
//! | Store I/O | [`StorageError`] | propagated |
//! | Rebuild | [`IndexError::Rebuild`] | delivered through the completion signal |

use thiserror::Error;

pub use shared_types::{Address, AssetId, BlockId, ChainId, Hash, StorageError};

/// Validation failures of an atomic transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtomicTxError {
    /// Issued on a different network.
    #[error("Wrong network id: expected {expected}, got {got}")]
    WrongNetworkId { expected: u32, got: u32 },

    /// Issued for a different chain.
    #[error("Wrong blockchain id")]
    WrongBlockchainId,

    /// Peer chain equals this chain.
    #[error("Peer chain must differ from this chain")]
    SameChain,

    /// Import without inputs.
    #[error("Import has no inputs")]
    NoImportInputs,

    /// Export without outputs.
    #[error("Export has no outputs")]
    NoExportOutputs,

    /// Input or output with zero amount.
    #[error("Zero-value {0}")]
    ZeroValue(&'static str),

    /// Input or output with the empty asset id.
    #[error("Empty asset id in {0}")]
    EmptyAssetId(&'static str),

    /// Inputs not sorted and unique.
    #[error("Inputs are not sorted and unique")]
    InputsNotSortedUnique,

    /// Consumed value does not cover produced value plus fee.
    #[error("Insufficient funds for asset {asset}: consumed {consumed}, required {required}")]
    InsufficientFunds {
        asset: String,
        consumed: u64,
        required: u64,
    },

    /// Arithmetic overflow while summing amounts or gas.
    #[error("Amount overflow")]
    Overflow,

    /// One credential per input is required.
    #[error("Credential count mismatch: expected {expected}, got {got}")]
    CredentialCountMismatch { expected: usize, got: usize },

    /// Signature does not verify.
    #[error("Invalid signature on credential {index}")]
    InvalidSignature { index: usize },

    /// Credential key does not own the input.
    #[error("Credential {index} is not signed by the input owner")]
    WrongSigner { index: usize },

    /// Imported UTXO is not in shared memory.
    #[error("UTXO not found: {0}")]
    UtxoNotFound(String),

    /// Input disagrees with the stored UTXO.
    #[error("Input {index} does not match the stored UTXO")]
    UtxoMismatch { index: usize },

    /// Export nonce does not match account state.
    #[error("Invalid nonce for {address}: expected {expected}, got {got}")]
    NonceMismatch {
        address: String,
        expected: u64,
        got: u64,
    },

    /// Account balance too low for an export input.
    #[error("Insufficient balance for {address}: have {available}, need {required}")]
    InsufficientBalance {
        address: String,
        available: u64,
        required: u64,
    },

    /// Encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Variant tag not recognized.
    #[error("Unknown atomic tx type: {0}")]
    UnknownTxType(u32),

    /// Shared memory lookup failed.
    #[error("Shared memory error: {0}")]
    SharedMemory(String),
}

impl From<bincode::Error> for AtomicTxError {
    fn from(err: bincode::Error) -> Self {
        AtomicTxError::Codec(err.to_string())
    }
}

/// Errors from the atomic index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Underlying store failure.
    #[error("Store error: {0}")]
    Store(#[from] StorageError),

    /// Leaf or log entry could not be (de)serialized.
    #[error("Codec error: {0}")]
    Codec(String),

    /// No trie is persisted under this root.
    #[error("Missing trie root: {0}")]
    MissingRoot(String),

    /// A leaf referenced by a root node is missing.
    #[error("Missing trie node: {0}")]
    MissingNode(String),

    /// Index key is not height(8) ∥ chain(32).
    #[error("Malformed index key of length {len}")]
    MalformedKey { len: usize },

    /// Height at or below an already indexed height.
    #[error("Height {height} already indexed (next indexable height is {next})")]
    NonIncreasingHeight { height: u64, next: u64 },

    /// No height follows this one.
    #[error("Height {0} has no successor")]
    HeightOverflow(u64),

    /// Same height buffered twice while rebuilding.
    #[error("Height {0} already buffered")]
    DuplicatePendingHeight(u64),

    /// Rebuild from the operation log failed.
    #[error("Rebuild failed at height {height}: {reason}")]
    Rebuild { height: u64, reason: String },

    /// Rebuild finalize callback failed.
    #[error("Rebuild finalize failed: {0}")]
    Finalize(String),

    /// Index called after the rebuild reported failure.
    #[error("Index unavailable, rebuild failed: {0}")]
    RebuildFailed(String),

    /// Rebuild already launched.
    #[error("Atomic index already initialized")]
    AlreadyInitialized,
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Codec(err.to_string())
    }
}

/// Errors returned by block verify/accept/reject.
#[derive(Debug, Error)]
pub enum BlockError {
    /// Block is malformed.
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Parent unknown, missing or rejected.
    #[error("Rejected parent: {0}")]
    RejectedParent(String),

    /// Accepted block does not extend the last accepted block.
    #[error("Parent {parent} is not the last accepted block {last_accepted}")]
    NotLastAcceptedChild {
        parent: String,
        last_accepted: String,
    },

    /// Block or pointer could not be (de)serialized.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Import consumes a UTXO that a processing ancestor also consumes.
    #[error("Conflicting atomic inputs with processing ancestor {ancestor}")]
    ConflictingAtomicInputs { ancestor: String },

    /// Atomic transaction variant not recognized.
    #[error("Unknown atomic tx type: {0}")]
    UnknownTxType(u32),

    /// Transaction failed semantic verification.
    #[error("Invalid block due to failed semantic verify at height {height}: {source}")]
    SemanticVerify {
        height: u64,
        #[source]
        source: AtomicTxError,
    },

    /// Normal block processing failed.
    #[error("Invalid block due to failed processing: {0}")]
    Processing(String),

    /// Status change not allowed.
    #[error("Invalid status transition: {from:?} -> {to:?}")]
    InvalidStatusTransition {
        from: super::BlockStatus,
        to: super::BlockStatus,
    },

    /// Block not in the block store.
    #[error("Unknown block: {0}")]
    UnknownBlock(String),

    /// Block already in the block store.
    #[error("Block already known: {0}")]
    DuplicateBlock(String),

    /// Store I/O failure.
    #[error("Store error: {0}")]
    Store(#[from] StorageError),

    /// Atomic index failure.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Shared memory rejected the operation set.
    #[error("Shared memory error: {0}")]
    SharedMemory(String),

    /// Configuration rejected at construction.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Chain backend refused acceptance.
    #[error("Chain error: {0}")]
    Chain(String),
}

impl From<bincode::Error> for BlockError {
    fn from(err: bincode::Error) -> Self {
        BlockError::Codec(err.to_string())
    }
}

impl BlockError {
    /// Map a transaction decode failure onto the block taxonomy.
    pub fn from_extract(err: AtomicTxError) -> Self {
        match err {
            AtomicTxError::UnknownTxType(type_id) => BlockError::UnknownTxType(type_id),
            other => BlockError::InvalidBlock(other.to_string()),
        }
    }
}
