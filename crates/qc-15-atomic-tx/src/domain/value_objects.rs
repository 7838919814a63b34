//! # Value Objects
//!
//! Operation sets, UTXO identifiers, block status and subsystem configuration.

use super::errors::{Address, AssetId, ChainId, Hash};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// Gas charged per signature carried in the credentials.
pub const SIGNATURE_GAS: u64 = 21_000;

/// Gas charged per byte of the unsigned transaction.
pub const TX_BYTES_GAS: u64 = 16;

/// Default atomic index commit stride.
pub const DEFAULT_COMMIT_INTERVAL: u64 = 4096;

/// A single put request against shared memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Key of the element (UTXO input id).
    pub key: Vec<u8>,
    /// Encoded value (the UTXO).
    pub value: Vec<u8>,
    /// Lookup traits (owner addresses).
    pub traits: Vec<Vec<u8>>,
}

/// Put/remove requests targeting one destination chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicRequests {
    /// Elements to write into the destination chain's shared memory.
    pub put_requests: Vec<Element>,
    /// Keys to delete from the destination chain's shared memory.
    pub remove_requests: Vec<Vec<u8>>,
}

impl AtomicRequests {
    /// Append another request set (puts then removes, order preserved).
    pub fn merge(&mut self, other: AtomicRequests) {
        self.put_requests.extend(other.put_requests);
        self.remove_requests.extend(other.remove_requests);
    }

    /// True if there is nothing to apply.
    pub fn is_empty(&self) -> bool {
        self.put_requests.is_empty() && self.remove_requests.is_empty()
    }
}

/// Operation set: destination chain -> requests.
pub type AtomicOps = BTreeMap<ChainId, AtomicRequests>;

/// Merge `other` into `into`, concatenating request lists per chain.
pub fn merge_ops(into: &mut AtomicOps, other: AtomicOps) {
    for (chain_id, requests) in other {
        into.entry(chain_id).or_default().merge(requests);
    }
}

/// Identifies an output of a transaction on another chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtxoId {
    /// Transaction that produced the output.
    pub tx_id: Hash,
    /// Output position within that transaction.
    pub output_index: u32,
}

impl UtxoId {
    /// Key under which the UTXO lives in shared memory.
    pub fn input_id(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.tx_id);
        hasher.update(self.output_index.to_be_bytes());
        hasher.finalize().into()
    }
}

/// An unspent output as stored in shared memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub utxo_id: UtxoId,
    pub asset_id: AssetId,
    pub amount: u64,
    pub owner: Address,
}

impl Utxo {
    /// Canonical bincode encoding.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from the shared-memory value.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Consensus status of a block.
///
/// Transitions: `Unknown -> Processing -> {Accepted, Rejected}`; the last two
/// are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockStatus {
    /// Not yet verified (or not known at all).
    Unknown,
    /// Verified, decision pending.
    Processing,
    /// Accepted into the canonical chain.
    Accepted,
    /// Rejected.
    Rejected,
}

impl BlockStatus {
    /// Whether the transition to `next` is allowed.
    pub fn can_transition_to(self, next: BlockStatus) -> bool {
        matches!(
            (self, next),
            (BlockStatus::Unknown, BlockStatus::Processing)
                | (BlockStatus::Processing, BlockStatus::Accepted)
                | (BlockStatus::Processing, BlockStatus::Rejected)
        )
    }

    /// Accepted or Rejected.
    pub fn is_decided(self) -> bool {
        matches!(self, BlockStatus::Accepted | BlockStatus::Rejected)
    }
}

/// Configuration for the atomic subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomicConfig {
    /// Network every atomic transaction must be issued on.
    pub network_id: u32,
    /// This chain's identifier.
    pub blockchain_id: ChainId,
    /// Asset in which fees are burned.
    pub native_asset_id: AssetId,
    /// Native units burned per unit of gas.
    pub base_fee: u64,
    /// Atomic index commit stride.
    pub commit_interval: u64,
    /// Historical blocks exempt from atomic verification and indexing.
    pub bonus_blocks: HashSet<Hash>,
    /// Minimum seconds between rebuild progress log lines.
    pub rebuild_progress_interval_secs: u64,
}

impl Default for AtomicConfig {
    fn default() -> Self {
        Self {
            network_id: 1,
            blockchain_id: [0x01; 32],
            native_asset_id: [0xAA; 32],
            base_fee: 1,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            bonus_blocks: HashSet::new(),
            rebuild_progress_interval_secs: 10,
        }
    }
}

impl AtomicConfig {
    /// Create with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the network id.
    pub fn with_network_id(mut self, network_id: u32) -> Self {
        self.network_id = network_id;
        self
    }

    /// Set this chain's id.
    pub fn with_blockchain_id(mut self, blockchain_id: ChainId) -> Self {
        self.blockchain_id = blockchain_id;
        self
    }

    /// Set the fee asset.
    pub fn with_native_asset_id(mut self, asset_id: AssetId) -> Self {
        self.native_asset_id = asset_id;
        self
    }

    /// Set the base fee.
    pub fn with_base_fee(mut self, base_fee: u64) -> Self {
        self.base_fee = base_fee;
        self
    }

    /// Set the index commit stride.
    pub fn with_commit_interval(mut self, interval: u64) -> Self {
        self.commit_interval = interval;
        self
    }

    /// Replace the bonus block allow-list.
    pub fn with_bonus_blocks(mut self, blocks: impl IntoIterator<Item = Hash>) -> Self {
        self.bonus_blocks = blocks.into_iter().collect();
        self
    }

    /// Whether `block_id` is on the bonus allow-list.
    pub fn is_bonus_block(&self, block_id: &Hash) -> bool {
        self.bonus_blocks.contains(block_id)
    }

    /// Reject configurations the subsystem cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.commit_interval == 0 {
            return Err("commit_interval must be greater than zero".to_string());
        }
        if self.native_asset_id == [0u8; 32] {
            return Err("native_asset_id must not be empty".to_string());
        }
        Ok(())
    }
}
