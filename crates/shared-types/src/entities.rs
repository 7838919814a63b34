//! # Core Identifiers
//!
//! Fixed-width identifiers shared by the chain, the atomic subsystem and the
//! shared cross-chain store.

/// A 32-byte hash (SHA-256 or Keccak-256 depending on the producer).
pub type Hash = [u8; 32];

/// A 20-byte Ethereum-style account address.
pub type Address = [u8; 20];

/// Identifier of a blockchain participating in the network (32 bytes).
pub type ChainId = [u8; 32];

/// Identifier of an asset moved across chains (32 bytes).
pub type AssetId = [u8; 32];

/// Identifier of a block (the hash of the underlying chain block).
pub type BlockId = Hash;

/// The all-zero hash. Used as "nothing committed" and "empty root".
pub const ZERO_HASH: Hash = [0u8; 32];

/// Short hex rendering of a hash for log lines (first 8 bytes).
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}
