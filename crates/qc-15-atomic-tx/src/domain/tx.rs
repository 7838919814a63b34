//! # Atomic Transactions
//!
//! An atomic transaction is either an import (consume UTXOs another chain
//! left in shared memory, credit accounts here) or an export (debit accounts
//! here, leave UTXOs in shared memory for another chain).
//!
//! ## Encoding
//!
//! ```text
//! unsigned = bincode(codec_version, type_id, bincode(body))
//! signed   = bincode(Envelope { codec_version, type_id, body, credentials })
//! id       = sha256(signed)
//! ```
//!
//! Each credential signs `sha256(unsigned)` with ed25519. The address of a
//! credential is the last 20 bytes of `keccak256(public_key)`.

use super::errors::{Address, AssetId, AtomicTxError, ChainId, Hash};
use super::export_tx::UnsignedExportTx;
use super::import_tx::UnsignedImportTx;
use super::state::StateDb;
use super::value_objects::{AtomicConfig, AtomicOps, AtomicRequests, SIGNATURE_GAS, TX_BYTES_GAS};
use crate::ports::SharedMemory;
use crate::versiondb::CommitBatch;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::collections::{BTreeMap, BTreeSet};

/// Codec version every envelope must carry.
pub const CODEC_VERSION: u16 = 0;

/// Type tag of [`UnsignedImportTx`].
pub const IMPORT_TX_TYPE: u32 = 0;

/// Type tag of [`UnsignedExportTx`].
pub const EXPORT_TX_TYPE: u32 = 1;

/// Signature over the unsigned transaction hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub public_key: [u8; 32],
    pub signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    codec_version: u16,
    type_id: u32,
    body: Vec<u8>,
    credentials: Vec<Credential>,
}

/// Derive the account address controlled by an ed25519 public key.
pub fn address_of(public_key: &[u8; 32]) -> Address {
    let digest = Keccak256::digest(public_key);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// Everything semantic verification may consult.
pub struct VerifyContext<'a> {
    pub config: &'a AtomicConfig,
    pub shared_memory: &'a dyn SharedMemory,
}

/// Capabilities every unsigned atomic transaction variant provides.
pub trait AtomicTxBody {
    /// Identifiers this transaction consumes; two transactions conflict when
    /// these sets intersect.
    fn consumed_inputs(&self) -> BTreeSet<Hash>;

    /// Checks that need no state.
    fn verify(&self, config: &AtomicConfig) -> Result<(), AtomicTxError>;

    /// Checks against shared memory, credentials and the fee.
    fn semantic_verify(&self, ctx: &VerifyContext<'_>, tx: &AtomicTx)
        -> Result<(), AtomicTxError>;

    /// Requests to apply to the peer chain's shared memory on acceptance.
    fn atomic_ops(&self, tx_id: &Hash) -> Result<(ChainId, AtomicRequests), AtomicTxError>;

    /// Apply this transaction's requests to shared memory in the same write
    /// as `batch`. Returns the applied operation set.
    fn accept(
        &self,
        tx_id: &Hash,
        shared_memory: &dyn SharedMemory,
        batch: CommitBatch<'_>,
    ) -> Result<AtomicOps, AtomicTxError> {
        let (chain_id, requests) = self.atomic_ops(tx_id)?;
        let ops = AtomicOps::from([(chain_id, requests)]);
        shared_memory
            .apply(&ops, batch)
            .map_err(|e| AtomicTxError::SharedMemory(e.to_string()))?;
        Ok(ops)
    }

    /// Account state changes on this chain.
    fn apply_state_transfer(&self, state: &mut StateDb) -> Result<(), AtomicTxError>;
}

/// Unsigned transaction, tagged by variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsignedAtomicTx {
    Import(UnsignedImportTx),
    Export(UnsignedExportTx),
}

impl UnsignedAtomicTx {
    pub fn type_id(&self) -> u32 {
        match self {
            UnsignedAtomicTx::Import(_) => IMPORT_TX_TYPE,
            UnsignedAtomicTx::Export(_) => EXPORT_TX_TYPE,
        }
    }

    pub fn body(&self) -> &dyn AtomicTxBody {
        match self {
            UnsignedAtomicTx::Import(tx) => tx,
            UnsignedAtomicTx::Export(tx) => tx,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>, AtomicTxError> {
        let body = match self {
            UnsignedAtomicTx::Import(tx) => bincode::serialize(tx)?,
            UnsignedAtomicTx::Export(tx) => bincode::serialize(tx)?,
        };
        Ok(body)
    }

    fn decode_body(type_id: u32, body: &[u8]) -> Result<Self, AtomicTxError> {
        match type_id {
            IMPORT_TX_TYPE => Ok(UnsignedAtomicTx::Import(bincode::deserialize(body)?)),
            EXPORT_TX_TYPE => Ok(UnsignedAtomicTx::Export(bincode::deserialize(body)?)),
            other => Err(AtomicTxError::UnknownTxType(other)),
        }
    }
}

impl From<UnsignedImportTx> for UnsignedAtomicTx {
    fn from(tx: UnsignedImportTx) -> Self {
        UnsignedAtomicTx::Import(tx)
    }
}

impl From<UnsignedExportTx> for UnsignedAtomicTx {
    fn from(tx: UnsignedExportTx) -> Self {
        UnsignedAtomicTx::Export(tx)
    }
}

/// A signed atomic transaction with its cached encodings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtomicTx {
    unsigned: UnsignedAtomicTx,
    credentials: Vec<Credential>,
    id: Hash,
    unsigned_bytes: Vec<u8>,
    signed_bytes: Vec<u8>,
}

impl AtomicTx {
    /// Sign `unsigned` with one key per input, in input order.
    pub fn sign(
        unsigned: impl Into<UnsignedAtomicTx>,
        keys: &[&SigningKey],
    ) -> Result<Self, AtomicTxError> {
        let unsigned = unsigned.into();
        let unsigned_bytes = encode_unsigned(&unsigned)?;
        let digest: [u8; 32] = Sha256::digest(&unsigned_bytes).into();

        let credentials = keys
            .iter()
            .map(|key| Credential {
                public_key: key.verifying_key().to_bytes(),
                signature: key.sign(&digest).to_bytes().to_vec(),
            })
            .collect();

        Self::from_parts(unsigned, credentials)
    }

    /// Assemble from an unsigned body and already-made credentials.
    pub fn from_parts(
        unsigned: UnsignedAtomicTx,
        credentials: Vec<Credential>,
    ) -> Result<Self, AtomicTxError> {
        let unsigned_bytes = encode_unsigned(&unsigned)?;
        let signed_bytes = bincode::serialize(&Envelope {
            codec_version: CODEC_VERSION,
            type_id: unsigned.type_id(),
            body: unsigned.encode_body()?,
            credentials: credentials.clone(),
        })?;

        Ok(Self {
            id: Sha256::digest(&signed_bytes).into(),
            unsigned,
            credentials,
            unsigned_bytes,
            signed_bytes,
        })
    }

    /// Parse a signed encoding.
    pub fn decode(bytes: &[u8]) -> Result<Self, AtomicTxError> {
        let envelope: Envelope = bincode::deserialize(bytes)?;
        if envelope.codec_version != CODEC_VERSION {
            return Err(AtomicTxError::Codec(format!(
                "unsupported codec version {}",
                envelope.codec_version
            )));
        }
        let unsigned = UnsignedAtomicTx::decode_body(envelope.type_id, &envelope.body)?;
        Self::from_parts(unsigned, envelope.credentials)
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn unsigned(&self) -> &UnsignedAtomicTx {
        &self.unsigned
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Signed encoding.
    pub fn bytes(&self) -> &[u8] {
        &self.signed_bytes
    }

    pub fn unsigned_bytes(&self) -> &[u8] {
        &self.unsigned_bytes
    }

    pub fn is_import(&self) -> bool {
        matches!(self.unsigned, UnsignedAtomicTx::Import(_))
    }

    pub fn consumed_inputs(&self) -> BTreeSet<Hash> {
        self.unsigned.body().consumed_inputs()
    }

    pub fn verify(&self, config: &AtomicConfig) -> Result<(), AtomicTxError> {
        self.unsigned.body().verify(config)
    }

    pub fn semantic_verify(&self, ctx: &VerifyContext<'_>) -> Result<(), AtomicTxError> {
        self.unsigned.body().semantic_verify(ctx, self)
    }

    pub fn atomic_ops(&self) -> Result<(ChainId, AtomicRequests), AtomicTxError> {
        self.unsigned.body().atomic_ops(&self.id)
    }

    pub fn accept(
        &self,
        shared_memory: &dyn SharedMemory,
        batch: CommitBatch<'_>,
    ) -> Result<AtomicOps, AtomicTxError> {
        self.unsigned.body().accept(&self.id, shared_memory, batch)
    }

    pub fn apply_state_transfer(&self, state: &mut StateDb) -> Result<(), AtomicTxError> {
        self.unsigned.body().apply_state_transfer(state)
    }

    /// Gas: unsigned bytes plus one signature charge per credential.
    pub fn gas_cost(&self) -> Result<u64, AtomicTxError> {
        let bytes_gas = (self.unsigned_bytes.len() as u64)
            .checked_mul(TX_BYTES_GAS)
            .ok_or(AtomicTxError::Overflow)?;
        let sig_gas = (self.credentials.len() as u64)
            .checked_mul(SIGNATURE_GAS)
            .ok_or(AtomicTxError::Overflow)?;
        bytes_gas.checked_add(sig_gas).ok_or(AtomicTxError::Overflow)
    }

    /// Native units burned: `gas_cost * base_fee`.
    pub fn fee(&self, config: &AtomicConfig) -> Result<u64, AtomicTxError> {
        self.gas_cost()?
            .checked_mul(config.base_fee)
            .ok_or(AtomicTxError::Overflow)
    }

    /// Check that credential `index` signs this transaction for `owner`.
    pub fn verify_credential(&self, index: usize, owner: &Address) -> Result<(), AtomicTxError> {
        let credential = self
            .credentials
            .get(index)
            .ok_or(AtomicTxError::CredentialCountMismatch {
                expected: index + 1,
                got: self.credentials.len(),
            })?;

        let key = VerifyingKey::from_bytes(&credential.public_key)
            .map_err(|_| AtomicTxError::InvalidSignature { index })?;
        let signature = Signature::from_slice(&credential.signature)
            .map_err(|_| AtomicTxError::InvalidSignature { index })?;
        let digest: [u8; 32] = Sha256::digest(&self.unsigned_bytes).into();
        key.verify(&digest, &signature)
            .map_err(|_| AtomicTxError::InvalidSignature { index })?;

        if address_of(&credential.public_key) != *owner {
            return Err(AtomicTxError::WrongSigner { index });
        }
        Ok(())
    }
}

fn encode_unsigned(unsigned: &UnsignedAtomicTx) -> Result<Vec<u8>, AtomicTxError> {
    Ok(bincode::serialize(&(
        CODEC_VERSION,
        unsigned.type_id(),
        unsigned.encode_body()?,
    ))?)
}

/// Per-asset accounting of consumed versus produced value.
#[derive(Debug, Default)]
pub struct FlowChecker {
    consumed: BTreeMap<AssetId, u64>,
    produced: BTreeMap<AssetId, u64>,
    overflowed: bool,
}

impl FlowChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consume(&mut self, asset_id: AssetId, amount: u64) {
        Self::add(&mut self.consumed, &mut self.overflowed, asset_id, amount);
    }

    pub fn produce(&mut self, asset_id: AssetId, amount: u64) {
        Self::add(&mut self.produced, &mut self.overflowed, asset_id, amount);
    }

    fn add(totals: &mut BTreeMap<AssetId, u64>, overflowed: &mut bool, asset: AssetId, amount: u64) {
        let entry = totals.entry(asset).or_insert(0);
        match entry.checked_add(amount) {
            Some(sum) => *entry = sum,
            None => *overflowed = true,
        }
    }

    /// Every asset must have consumed at least what it produced.
    pub fn verify(&self) -> Result<(), AtomicTxError> {
        if self.overflowed {
            return Err(AtomicTxError::Overflow);
        }
        for (asset, &required) in &self.produced {
            let consumed = self.consumed.get(asset).copied().unwrap_or(0);
            if consumed < required {
                return Err(AtomicTxError::InsufficientFunds {
                    asset: hex::encode(asset),
                    consumed,
                    required,
                });
            }
        }
        Ok(())
    }
}

/// Whether `ids` is strictly ascending.
pub(crate) fn is_sorted_unique<T: Ord>(ids: impl IntoIterator<Item = T>) -> bool {
    let mut prev: Option<T> = None;
    for id in ids {
        if let Some(p) = &prev {
            if *p >= id {
                return false;
            }
        }
        prev = Some(id);
    }
    true
}
