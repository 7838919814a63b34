//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use ed25519_dalek::SigningKey;
use qc_15_atomic_tx::domain::{ChainId, EvmInput, TransferableOutput};
use qc_15_atomic_tx::operation_log::merge_atomic_ops;
use qc_15_atomic_tx::service::{INDEX_META_PREFIX, OPERATION_LOG_PREFIX, TRIE_NODE_PREFIX};
use qc_15_atomic_tx::{
    AtomicConfig, AtomicIndex, AtomicOps, AtomicTx, IndexEntry, InMemoryKvStore, KeyValueStore,
    KvTrieDatabase, OperationLog, PrefixDb, TrieDatabase, UnsignedExportTx,
};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

pub type LogStore = PrefixDb<Arc<InMemoryKvStore>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[11u8; 32])
}

/// `count` distinct random chain ids, none equal to the default chain id.
pub fn random_chain_ids(count: usize) -> Vec<ChainId> {
    let config = AtomicConfig::default();
    let mut rng = rand::thread_rng();
    let mut ids = Vec::with_capacity(count);
    while ids.len() < count {
        let id: ChainId = rng.gen();
        if id != config.blockchain_id && !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

pub fn export_to(key: &SigningKey, destination: ChainId, nonce: u64) -> AtomicTx {
    let config = AtomicConfig::default();
    AtomicTx::sign(
        UnsignedExportTx {
            network_id: config.network_id,
            blockchain_id: config.blockchain_id,
            destination_chain: destination,
            ins: vec![EvmInput {
                address: qc_15_atomic_tx::domain::address_of(&key.verifying_key().to_bytes()),
                amount: 100_000,
                asset_id: config.native_asset_id,
                nonce,
            }],
            exported_outputs: vec![TransferableOutput {
                asset_id: config.native_asset_id,
                amount: 50_000 + nonce,
                owner: [0x55; 20],
            }],
        },
        &[key],
    )
    .unwrap()
}

/// One export per chain at every height in `heights`.
pub fn history(
    heights: std::ops::RangeInclusive<u64>,
    chains: &[ChainId],
) -> BTreeMap<u64, Vec<AtomicTx>> {
    let key = signing_key();
    heights
        .map(|height| {
            let txs = chains
                .iter()
                .enumerate()
                .map(|(i, chain)| export_to(&key, *chain, height * chains.len() as u64 + i as u64))
                .collect();
            (height, txs)
        })
        .collect()
}

pub fn ops_at(history: &BTreeMap<u64, Vec<AtomicTx>>, height: u64) -> AtomicOps {
    merge_atomic_ops(&history[&height]).unwrap()
}

/// An atomic index and operation log laid out the way the engine lays them
/// out in one store.
pub struct IndexFixture {
    pub store: Arc<InMemoryKvStore>,
    pub log: Arc<OperationLog<LogStore>>,
    pub index: AtomicIndex,
}

impl IndexFixture {
    pub fn new(commit_interval: u64) -> Self {
        Self::open(Arc::new(InMemoryKvStore::new()), commit_interval)
    }

    /// Open over an existing store, as after a restart.
    pub fn open(store: Arc<InMemoryKvStore>, commit_interval: u64) -> Self {
        let config = AtomicConfig::default().with_commit_interval(commit_interval);
        let meta: Arc<dyn KeyValueStore> =
            Arc::new(PrefixDb::new(INDEX_META_PREFIX, store.clone()));
        let trie_db: Arc<dyn TrieDatabase> = Arc::new(KvTrieDatabase::new(PrefixDb::new(
            TRIE_NODE_PREFIX,
            store.clone(),
        )));
        let log = OperationLog::open(PrefixDb::new(OPERATION_LOG_PREFIX, store.clone())).unwrap();
        let index = AtomicIndex::new(meta, trie_db, &config).unwrap();
        Self {
            store,
            log: Arc::new(log),
            index,
        }
    }

    pub fn log_history(&self, history: &BTreeMap<u64, Vec<AtomicTx>>) {
        for (height, txs) in history {
            self.log.write(*height, txs).unwrap();
        }
    }

    /// Run the rebuild to completion with a no-op finalize.
    pub async fn rebuild(&self) {
        self.index
            .initialize(self.log.clone(), || Ok(()))
            .await
            .unwrap()
            .unwrap();
    }

    /// Every entry committed under the last committed root.
    pub fn committed_entries(&self) -> Vec<IndexEntry> {
        let (root, _) = self.index.last_committed().unwrap();
        self.index
            .iterator(root)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }
}
