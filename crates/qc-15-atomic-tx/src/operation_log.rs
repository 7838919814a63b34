//! # Operation Log
//!
//! Durable record of the atomic transactions accepted at each height. The
//! atomic index is rebuilt from it.
//!
//! ## Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | height (8 bytes, big-endian) | bincode list of signed tx encodings |
//! | `tx:` ∥ tx id | height (8 bytes, big-endian) |
//! | `initialized` | empty |
//!
//! Only height entries are exactly 8 bytes long, which is how scans tell them
//! apart from the other keys.

use crate::domain::{
    merge_ops, AtomicOps, AtomicTx, AtomicTxError, Hash, IndexError, StorageError,
};
use crate::ports::{BatchOperation, KeyValueStore, ScanResult};
use tracing::debug;

/// Marker written the first time the log is opened.
pub const INITIALIZED_KEY: &[u8] = b"initialized";

const TX_INDEX_PREFIX: &[u8] = b"tx:";

/// Key of the entry for `height`.
pub fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// Height of a height entry key; `None` for every other key.
pub fn parse_height_key(key: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(key).ok().map(u64::from_be_bytes)
}

fn tx_index_key(tx_id: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(TX_INDEX_PREFIX.len() + tx_id.len());
    key.extend_from_slice(TX_INDEX_PREFIX);
    key.extend_from_slice(tx_id);
    key
}

pub struct OperationLog<S> {
    store: S,
}

impl<S: KeyValueStore> OperationLog<S> {
    /// Open the log, writing the initialized marker if it is missing.
    pub fn open(store: S) -> Result<Self, StorageError> {
        if !store.has(INITIALIZED_KEY)? {
            store.put(INITIALIZED_KEY, &[])?;
            debug!("[qc-15] Operation log initialized");
        }
        Ok(Self { store })
    }

    pub fn is_initialized(&self) -> Result<bool, StorageError> {
        self.store.has(INITIALIZED_KEY)
    }

    /// Record `txs` as the atomic transactions accepted at `height`.
    pub fn write(&self, height: u64, txs: &[AtomicTx]) -> Result<(), IndexError> {
        let encoded: Vec<&[u8]> = txs.iter().map(AtomicTx::bytes).collect();
        let mut operations = vec![BatchOperation::put(
            height_key(height).to_vec(),
            bincode::serialize(&encoded)?,
        )];
        for tx in txs {
            operations.push(BatchOperation::put(
                tx_index_key(&tx.id()),
                height_key(height).to_vec(),
            ));
        }
        self.store.atomic_batch_write(operations)?;
        Ok(())
    }

    pub fn get_by_height(&self, height: u64) -> Result<Vec<AtomicTx>, IndexError> {
        match self.store.get(&height_key(height))? {
            Some(bytes) => Self::decode(&bytes),
            None => Ok(Vec::new()),
        }
    }

    /// The transaction with `tx_id` and the height it was accepted at.
    pub fn get_by_tx_id(&self, tx_id: &Hash) -> Result<Option<(AtomicTx, u64)>, IndexError> {
        let Some(height_bytes) = self.store.get(&tx_index_key(tx_id))? else {
            return Ok(None);
        };
        let height = parse_height_key(&height_bytes).ok_or(IndexError::MalformedKey {
            len: height_bytes.len(),
        })?;
        Ok(self
            .get_by_height(height)?
            .into_iter()
            .find(|tx| tx.id() == *tx_id)
            .map(|tx| (tx, height)))
    }

    /// Raw entries from `height` on, in key order. Includes non-height keys.
    pub fn iterate_from(&self, height: u64) -> Result<ScanResult, StorageError> {
        self.store.scan_from(&height_key(height))
    }

    /// Decode one height entry.
    pub fn decode(bytes: &[u8]) -> Result<Vec<AtomicTx>, IndexError> {
        let encoded: Vec<Vec<u8>> = bincode::deserialize(bytes)?;
        encoded
            .iter()
            .map(|tx| AtomicTx::decode(tx).map_err(|e| IndexError::Codec(e.to_string())))
            .collect()
    }
}

/// Merge the operation sets of every transaction at one height.
pub fn merge_atomic_ops(txs: &[AtomicTx]) -> Result<AtomicOps, AtomicTxError> {
    let mut merged = AtomicOps::new();
    for tx in txs {
        let (chain_id, requests) = tx.atomic_ops()?;
        merge_ops(&mut merged, AtomicOps::from([(chain_id, requests)]));
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryKvStore;
    use crate::domain::{AtomicConfig, EvmInput, TransferableOutput, UnsignedExportTx};
    use ed25519_dalek::SigningKey;
    use std::sync::Arc;

    fn export(destination: u8, nonce: u64) -> AtomicTx {
        let config = AtomicConfig::default();
        let key = SigningKey::from_bytes(&[4u8; 32]);
        AtomicTx::sign(
            UnsignedExportTx {
                network_id: config.network_id,
                blockchain_id: config.blockchain_id,
                destination_chain: [destination; 32],
                ins: vec![EvmInput {
                    address: [1u8; 20],
                    amount: 100_000_000,
                    asset_id: config.native_asset_id,
                    nonce,
                }],
                exported_outputs: vec![TransferableOutput {
                    asset_id: config.native_asset_id,
                    amount: 5,
                    owner: [2u8; 20],
                }],
            },
            &[&key],
        )
        .unwrap()
    }

    #[test]
    fn test_open_writes_marker_once() {
        let store = Arc::new(InMemoryKvStore::new());
        let log = OperationLog::open(store.clone()).unwrap();
        assert!(log.is_initialized().unwrap());
        assert_eq!(store.len(), 1);
        OperationLog::open(store.clone()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_write_and_lookup() {
        let log = OperationLog::open(Arc::new(InMemoryKvStore::new())).unwrap();
        let tx = export(2, 0);
        log.write(7, &[tx.clone()]).unwrap();

        assert_eq!(log.get_by_height(7).unwrap(), vec![tx.clone()]);
        assert!(log.get_by_height(8).unwrap().is_empty());
        assert_eq!(log.get_by_tx_id(&tx.id()).unwrap(), Some((tx, 7)));
        assert_eq!(log.get_by_tx_id(&[0u8; 32]).unwrap(), None);
    }

    #[test]
    fn test_iterate_from_orders_heights() {
        let log = OperationLog::open(Arc::new(InMemoryKvStore::new())).unwrap();
        for height in [5u64, 1, 3] {
            log.write(height, &[export(2, height)]).unwrap();
        }

        let heights: Vec<u64> = log
            .iterate_from(2)
            .unwrap()
            .iter()
            .filter_map(|(key, _)| parse_height_key(key))
            .collect();
        assert_eq!(heights, vec![3, 5]);
    }

    #[test]
    fn test_merge_atomic_ops_per_destination() {
        let txs = vec![export(2, 0), export(2, 1), export(3, 2)];
        let merged = merge_atomic_ops(&txs).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&[2u8; 32]].put_requests.len(), 2);
        assert_eq!(merged[&[3u8; 32]].put_requests.len(), 1);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            OperationLog::<Arc<InMemoryKvStore>>::decode(&[0xFF]),
            Err(IndexError::Codec(_))
        ));
    }
}
