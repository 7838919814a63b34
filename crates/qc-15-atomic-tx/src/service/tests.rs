//! # Atomic Engine Tests

use super::*;
use crate::adapters::{InMemoryChain, InMemoryKvStore, InMemoryMempool, InMemorySharedMemory};
use crate::domain::{
    address_of, AtomicTx, AtomicTxError, Element, EvmInput, EvmOutput, StateDb, TransferableInput,
    TransferableOutput, UnsignedExportTx, UnsignedImportTx, Utxo, UtxoId,
};
use crate::ports::AtomicMempool;
use ed25519_dalek::SigningKey;

type TestEngine = AtomicEngine<InMemoryKvStore, InMemoryMempool, InMemoryChain, InMemorySharedMemory>;

const PEER_CHAIN: [u8; 32] = [0x22; 32];
const UTXO_AMOUNT: u64 = 1_000_000;
const FUNDED_BALANCE: u64 = 10_000_000;

struct Harness {
    engine: TestEngine,
    mempool: Arc<InMemoryMempool>,
    shared_memory: Arc<InMemorySharedMemory>,
    genesis: ChainBlock,
    key: SigningKey,
}

fn genesis_block() -> ChainBlock {
    ChainBlock::new([0u8; 32], 0, 0)
}

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn harness(config: AtomicConfig) -> Harness {
    let key = signing_key();
    let owner = address_of(&key.verifying_key().to_bytes());
    let genesis = genesis_block();

    let mut state = StateDb::new();
    state.add_balance(owner, config.native_asset_id, FUNDED_BALANCE);

    let mempool = Arc::new(InMemoryMempool::default());
    let shared_memory = Arc::new(InMemorySharedMemory::new());
    seed_utxo(&shared_memory, &config, utxo_id(1), owner);

    let deps = AtomicDependencies {
        store: Arc::new(InMemoryKvStore::new()),
        mempool: mempool.clone(),
        chain: Arc::new(InMemoryChain::new(&genesis, state)),
        shared_memory: shared_memory.clone(),
        config,
    };
    let engine = AtomicEngine::new(deps, genesis.clone()).unwrap();

    Harness {
        engine,
        mempool,
        shared_memory,
        genesis,
        key,
    }
}

fn utxo_id(seed: u8) -> UtxoId {
    UtxoId {
        tx_id: [seed; 32],
        output_index: 0,
    }
}

fn seed_utxo(memory: &InMemorySharedMemory, config: &AtomicConfig, id: UtxoId, owner: [u8; 20]) {
    let utxo = Utxo {
        utxo_id: id,
        asset_id: config.native_asset_id,
        amount: UTXO_AMOUNT,
        owner,
    };
    memory.seed_inbound(
        PEER_CHAIN,
        Element {
            key: id.input_id().to_vec(),
            value: utxo.encode().unwrap(),
            traits: vec![owner.to_vec()],
        },
    );
}

fn import_tx(h: &Harness, id: UtxoId, out_amount: u64) -> AtomicTx {
    signed_import(h.engine.config(), &h.key, id, out_amount)
}

fn signed_import(config: &AtomicConfig, key: &SigningKey, id: UtxoId, out_amount: u64) -> AtomicTx {
    AtomicTx::sign(
        UnsignedImportTx {
            network_id: config.network_id,
            blockchain_id: config.blockchain_id,
            source_chain: PEER_CHAIN,
            imported_inputs: vec![TransferableInput {
                utxo_id: id,
                asset_id: config.native_asset_id,
                amount: UTXO_AMOUNT,
            }],
            outs: vec![EvmOutput {
                address: [0x33; 20],
                amount: out_amount,
                asset_id: config.native_asset_id,
            }],
        },
        &[key],
    )
    .unwrap()
}

fn export_tx(h: &Harness, nonce: u64) -> AtomicTx {
    let config = h.engine.config();
    AtomicTx::sign(
        UnsignedExportTx {
            network_id: config.network_id,
            blockchain_id: config.blockchain_id,
            destination_chain: PEER_CHAIN,
            ins: vec![EvmInput {
                address: address_of(&h.key.verifying_key().to_bytes()),
                amount: UTXO_AMOUNT,
                asset_id: config.native_asset_id,
                nonce,
            }],
            exported_outputs: vec![TransferableOutput {
                asset_id: config.native_asset_id,
                amount: 900_000,
                owner: [0x44; 20],
            }],
        },
        &[&h.key],
    )
    .unwrap()
}

fn child(parent: &ChainBlock, timestamp: u64, tx: Option<&AtomicTx>) -> ChainBlock {
    let block = ChainBlock::new(parent.hash(), parent.height + 1, timestamp);
    match tx {
        Some(tx) => block.with_atomic_tx(tx),
        None => block,
    }
}

#[test]
fn test_accept_import_consumes_shared_memory() {
    let h = harness(AtomicConfig::default());
    let tx = import_tx(&h, utxo_id(1), 900_000);
    let block = child(&h.genesis, 1, Some(&tx));

    let id = h.engine.add_block(block).unwrap();
    h.engine.verify(&id).unwrap();
    assert_eq!(h.engine.status(&id), BlockStatus::Processing);
    assert_eq!(h.shared_memory.inbound_len(&PEER_CHAIN), 1);

    h.engine.accept(&id).unwrap();

    assert_eq!(h.engine.status(&id), BlockStatus::Accepted);
    assert_eq!(h.engine.last_accepted(), id);
    assert_eq!(h.engine.persisted_last_accepted().unwrap(), Some(id));
    assert_eq!(h.shared_memory.inbound_len(&PEER_CHAIN), 0);
    assert_eq!(
        h.engine.operation_log().get_by_tx_id(&tx.id()).unwrap(),
        Some((tx, 1))
    );
    // Rebuild not started yet, so the height waits in the buffer
    assert_eq!(h.engine.index().buffered_heights(), 1);
}

#[test]
fn test_accept_export_puts_outbound() {
    let h = harness(AtomicConfig::default());
    let tx = export_tx(&h, 0);
    let id = h.engine.add_block(child(&h.genesis, 1, Some(&tx))).unwrap();

    h.engine.verify(&id).unwrap();
    h.engine.accept(&id).unwrap();

    let key = UtxoId {
        tx_id: tx.id(),
        output_index: 0,
    }
    .input_id();
    let element = h.shared_memory.outbound(&PEER_CHAIN, &key).unwrap();
    let utxo = Utxo::decode(&element.value).unwrap();
    assert_eq!(utxo.amount, 900_000);
    assert_eq!(utxo.owner, [0x44; 20]);
}

#[test]
fn test_export_with_stale_nonce_fails_processing() {
    let h = harness(AtomicConfig::default());
    let tx = export_tx(&h, 3);
    let id = h.engine.add_block(child(&h.genesis, 1, Some(&tx))).unwrap();

    assert!(matches!(
        h.engine.verify(&id),
        Err(BlockError::Processing(_))
    ));
    assert_eq!(h.engine.status(&id), BlockStatus::Unknown);
}

#[test]
fn test_unknown_parent_rejected() {
    let h = harness(AtomicConfig::default());
    let orphan = ChainBlock::new([9u8; 32], 1, 1);
    let id = h.engine.add_block(orphan).unwrap();

    assert!(matches!(
        h.engine.verify(&id),
        Err(BlockError::RejectedParent(_))
    ));
}

#[test]
fn test_child_of_rejected_block_rejected() {
    let h = harness(AtomicConfig::default());
    let parent = child(&h.genesis, 1, None);
    let parent_id = h.engine.add_block(parent.clone()).unwrap();
    h.engine.verify(&parent_id).unwrap();
    h.engine.reject(&parent_id).unwrap();

    let id = h.engine.add_block(child(&parent, 2, None)).unwrap();
    assert!(matches!(
        h.engine.verify(&id),
        Err(BlockError::RejectedParent(_))
    ));
}

#[test]
fn test_wrong_height_invalid() {
    let h = harness(AtomicConfig::default());
    let block = ChainBlock::new(h.genesis.hash(), 5, 1);
    let id = h.engine.add_block(block).unwrap();

    assert!(matches!(
        h.engine.verify(&id),
        Err(BlockError::InvalidBlock(_))
    ));
}

#[test]
fn test_import_conflicting_with_processing_ancestor() {
    let h = harness(AtomicConfig::default());
    let tx = import_tx(&h, utxo_id(1), 900_000);
    let parent = child(&h.genesis, 1, Some(&tx));
    let parent_id = h.engine.add_block(parent.clone()).unwrap();
    h.engine.verify(&parent_id).unwrap();

    // Same UTXO spent again by a different transaction further down
    let double_spend = import_tx(&h, utxo_id(1), 800_000);
    let id = h
        .engine
        .add_block(child(&parent, 2, Some(&double_spend)))
        .unwrap();

    assert!(matches!(
        h.engine.verify(&id),
        Err(BlockError::ConflictingAtomicInputs { .. })
    ));
}

#[test]
fn test_import_of_missing_utxo_fails_semantic_verify() {
    let h = harness(AtomicConfig::default());
    let tx = import_tx(&h, utxo_id(2), 900_000);
    let id = h.engine.add_block(child(&h.genesis, 1, Some(&tx))).unwrap();

    assert!(matches!(
        h.engine.verify(&id),
        Err(BlockError::SemanticVerify {
            height: 1,
            source: AtomicTxError::UtxoNotFound(_)
        })
    ));
}

#[test]
fn test_rejected_claimant_releases_utxo() {
    let h = harness(AtomicConfig::default());
    let tx = import_tx(&h, utxo_id(1), 900_000);
    h.mempool.add(tx.clone()).unwrap();
    assert_eq!(h.mempool.next_tx(), Some(tx.clone()));

    let claimant = child(&h.genesis, 1, Some(&tx));
    let claimant_id = h.engine.add_block(claimant.clone()).unwrap();
    h.engine.verify(&claimant_id).unwrap();

    // While the claimant is processing, nothing below it may claim again
    let under_claimant = h
        .engine
        .add_block(child(&claimant, 2, Some(&tx)))
        .unwrap();
    assert!(matches!(
        h.engine.verify(&under_claimant),
        Err(BlockError::ConflictingAtomicInputs { .. })
    ));

    h.engine.reject(&claimant_id).unwrap();
    assert_eq!(h.mempool.pending_len(), 1);

    // Built after the rejection, on a fresh branch
    let parent = child(&h.genesis, 3, None);
    let parent_id = h.engine.add_block(parent.clone()).unwrap();
    h.engine.verify(&parent_id).unwrap();
    let reclaim = h.engine.add_block(child(&parent, 4, Some(&tx))).unwrap();
    h.engine.verify(&reclaim).unwrap();

    h.engine.accept(&parent_id).unwrap();
    h.engine.accept(&reclaim).unwrap();
    assert_eq!(h.engine.status(&claimant_id), BlockStatus::Rejected);
    assert_eq!(h.engine.status(&reclaim), BlockStatus::Accepted);
    assert!(!h.mempool.contains(&tx.id()));
    assert_eq!(h.shared_memory.inbound_len(&PEER_CHAIN), 0);
}

#[test]
fn test_accept_requires_last_accepted_parent() {
    let h = harness(AtomicConfig::default());
    let tx = export_tx(&h, 0);
    let first = h.engine.add_block(child(&h.genesis, 1, None)).unwrap();
    let second = h.engine.add_block(child(&h.genesis, 2, Some(&tx))).unwrap();
    h.engine.verify(&first).unwrap();
    h.engine.verify(&second).unwrap();

    h.engine.accept(&first).unwrap();
    assert!(matches!(
        h.engine.accept(&second),
        Err(BlockError::NotLastAcceptedChild { .. })
    ));

    assert_eq!(h.engine.status(&second), BlockStatus::Processing);
    assert_eq!(h.engine.last_accepted(), first);
    assert_eq!(h.engine.persisted_last_accepted().unwrap(), Some(first));
    assert!(h.engine.operation_log().get_by_height(1).unwrap().is_empty());
    let key = UtxoId {
        tx_id: tx.id(),
        output_index: 0,
    }
    .input_id();
    assert!(h.shared_memory.outbound(&PEER_CHAIN, &key).is_none());
}

#[test]
fn test_bonus_block_skips_atomic_checks() {
    let key = signing_key();
    let genesis = genesis_block();
    let config = AtomicConfig::default();

    // Built before the engine so its id can go on the allow-list
    let tx = signed_import(&config, &key, utxo_id(5), 900_000);
    let bonus = child(&genesis, 1, Some(&tx));

    let h = harness(config.with_bonus_blocks([bonus.hash()]));
    let id = h.engine.add_block(bonus).unwrap();
    h.engine.verify(&id).unwrap();
    h.engine.accept(&id).unwrap();

    assert_eq!(h.engine.status(&id), BlockStatus::Accepted);
    assert_eq!(h.engine.index().buffered_heights(), 0);
    assert_eq!(h.shared_memory.inbound_len(&PEER_CHAIN), 1);
    assert_eq!(
        h.engine.operation_log().get_by_height(1).unwrap(),
        vec![tx.clone()]
    );

    // The same transaction outside the allow-list is still verified
    let sibling = h.engine.add_block(child(&h.genesis, 9, Some(&tx))).unwrap();
    assert!(matches!(
        h.engine.verify(&sibling),
        Err(BlockError::SemanticVerify { .. })
    ));
}

#[test]
fn test_bonus_block_skips_conflict_walk() {
    let key = signing_key();
    let genesis = genesis_block();
    let config = AtomicConfig::default();

    let claim = signed_import(&config, &key, utxo_id(1), 900_000);
    let parent = child(&genesis, 1, Some(&claim));
    let double_claim = signed_import(&config, &key, utxo_id(1), 800_000);
    let bonus = child(&parent, 2, Some(&double_claim));

    let h = harness(config.with_bonus_blocks([bonus.hash()]));
    let parent_id = h.engine.add_block(parent.clone()).unwrap();
    h.engine.verify(&parent_id).unwrap();

    let bonus_id = h.engine.add_block(bonus).unwrap();
    h.engine.verify(&bonus_id).unwrap();
    assert_eq!(h.engine.status(&bonus_id), BlockStatus::Processing);

    // Same content under the same processing ancestor, not on the list
    let plain = h
        .engine
        .add_block(child(&parent, 3, Some(&double_claim)))
        .unwrap();
    assert!(matches!(
        h.engine.verify(&plain),
        Err(BlockError::ConflictingAtomicInputs { .. })
    ));
}

#[test]
fn test_status_transitions_enforced() {
    let h = harness(AtomicConfig::default());
    let id = h.engine.add_block(child(&h.genesis, 1, None)).unwrap();

    assert!(matches!(
        h.engine.accept(&id),
        Err(BlockError::InvalidStatusTransition { .. })
    ));
    h.engine.verify(&id).unwrap();
    assert!(matches!(
        h.engine.verify(&id),
        Err(BlockError::InvalidStatusTransition { .. })
    ));
    h.engine.accept(&id).unwrap();
    assert!(matches!(
        h.engine.reject(&id),
        Err(BlockError::InvalidStatusTransition { .. })
    ));
}

#[test]
fn test_duplicate_and_unknown_blocks() {
    let h = harness(AtomicConfig::default());
    let block = child(&h.genesis, 1, None);
    h.engine.add_block(block.clone()).unwrap();

    assert!(matches!(
        h.engine.add_block(block),
        Err(BlockError::DuplicateBlock(_))
    ));
    assert!(matches!(
        h.engine.verify(&[0xEE; 32]),
        Err(BlockError::UnknownBlock(_))
    ));
    assert_eq!(h.engine.status(&[0xEE; 32]), BlockStatus::Unknown);
}

#[test]
fn test_invalid_config_refused() {
    let deps = AtomicDependencies {
        store: Arc::new(InMemoryKvStore::new()),
        mempool: Arc::new(InMemoryMempool::default()),
        chain: Arc::new(InMemoryChain::new(&genesis_block(), StateDb::new())),
        shared_memory: Arc::new(InMemorySharedMemory::new()),
        config: AtomicConfig::default().with_commit_interval(0),
    };
    assert!(matches!(
        TestEngine::new(deps, genesis_block()),
        Err(BlockError::Config(_))
    ));
}

#[tokio::test]
async fn test_index_commits_after_rebuild() {
    let h = harness(AtomicConfig::default().with_commit_interval(2));
    h.engine.initialize_index(|| Ok(())).await.unwrap().unwrap();

    let mut parent = h.genesis.clone();
    for height in 1..=3u64 {
        let block = child(&parent, height, None);
        let id = h.engine.add_block(block.clone()).unwrap();
        h.engine.verify(&id).unwrap();
        h.engine.accept(&id).unwrap();
        parent = block;
    }

    assert_eq!(h.engine.index().phase_name(), "steady");
    let (root, next) = h.engine.last_committed().unwrap();
    assert_eq!(next, 3);
    assert_eq!(h.engine.index().committed_root(2).unwrap(), Some(root));
    assert_eq!(h.engine.index().index_height().unwrap(), Some(4));
}

#[tokio::test]
async fn test_second_initialize_refused() {
    let h = harness(AtomicConfig::default());
    h.engine.initialize_index(|| Ok(())).await.unwrap().unwrap();

    assert_eq!(
        h.engine.initialize_index(|| Ok(())).await.unwrap(),
        Err(IndexError::AlreadyInitialized)
    );
}
