//! Import: consume UTXOs a source chain left in shared memory and credit
//! accounts on this chain.

use super::errors::{Address, AssetId, AtomicTxError, ChainId, Hash};
use super::state::StateDb;
use super::tx::{is_sorted_unique, AtomicTx, AtomicTxBody, FlowChecker, VerifyContext};
use super::value_objects::{AtomicConfig, AtomicRequests, Utxo, UtxoId};
use crate::ports::SharedMemoryView;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reference to a UTXO being imported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableInput {
    pub utxo_id: UtxoId,
    pub asset_id: AssetId,
    pub amount: u64,
}

/// Credit to an account on this chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmOutput {
    pub address: Address,
    pub amount: u64,
    pub asset_id: AssetId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedImportTx {
    pub network_id: u32,
    pub blockchain_id: ChainId,
    /// Chain whose shared memory holds the UTXOs.
    pub source_chain: ChainId,
    /// Must be sorted by input id, without duplicates.
    pub imported_inputs: Vec<TransferableInput>,
    pub outs: Vec<EvmOutput>,
}

impl UnsignedImportTx {
    fn input_ids(&self) -> impl Iterator<Item = Hash> + '_ {
        self.imported_inputs.iter().map(|input| input.utxo_id.input_id())
    }
}

impl AtomicTxBody for UnsignedImportTx {
    fn consumed_inputs(&self) -> BTreeSet<Hash> {
        self.input_ids().collect()
    }

    fn verify(&self, config: &AtomicConfig) -> Result<(), AtomicTxError> {
        if self.network_id != config.network_id {
            return Err(AtomicTxError::WrongNetworkId {
                expected: config.network_id,
                got: self.network_id,
            });
        }
        if self.blockchain_id != config.blockchain_id {
            return Err(AtomicTxError::WrongBlockchainId);
        }
        if self.source_chain == config.blockchain_id {
            return Err(AtomicTxError::SameChain);
        }
        if self.imported_inputs.is_empty() {
            return Err(AtomicTxError::NoImportInputs);
        }

        for input in &self.imported_inputs {
            if input.amount == 0 {
                return Err(AtomicTxError::ZeroValue("input"));
            }
            if input.asset_id == [0u8; 32] {
                return Err(AtomicTxError::EmptyAssetId("input"));
            }
        }
        for out in &self.outs {
            if out.amount == 0 {
                return Err(AtomicTxError::ZeroValue("output"));
            }
            if out.asset_id == [0u8; 32] {
                return Err(AtomicTxError::EmptyAssetId("output"));
            }
        }

        if !is_sorted_unique(self.input_ids()) {
            return Err(AtomicTxError::InputsNotSortedUnique);
        }
        Ok(())
    }

    fn semantic_verify(
        &self,
        ctx: &VerifyContext<'_>,
        tx: &AtomicTx,
    ) -> Result<(), AtomicTxError> {
        if tx.credentials().len() != self.imported_inputs.len() {
            return Err(AtomicTxError::CredentialCountMismatch {
                expected: self.imported_inputs.len(),
                got: tx.credentials().len(),
            });
        }

        let mut flow = FlowChecker::new();
        for input in &self.imported_inputs {
            flow.consume(input.asset_id, input.amount);
        }
        for out in &self.outs {
            flow.produce(out.asset_id, out.amount);
        }
        flow.produce(ctx.config.native_asset_id, tx.fee(ctx.config)?);
        flow.verify()?;

        let keys: Vec<Vec<u8>> = self.input_ids().map(|id| id.to_vec()).collect();
        let view = SharedMemoryView::open(ctx.shared_memory, self.source_chain);
        let values = view
            .get(&keys)
            .map_err(|e| AtomicTxError::SharedMemory(e.to_string()))?;

        for (index, (input, value)) in self.imported_inputs.iter().zip(values).enumerate() {
            let bytes = value
                .ok_or_else(|| AtomicTxError::UtxoNotFound(hex::encode(input.utxo_id.input_id())))?;
            let utxo = Utxo::decode(&bytes)?;

            if utxo.utxo_id != input.utxo_id
                || utxo.asset_id != input.asset_id
                || utxo.amount != input.amount
            {
                return Err(AtomicTxError::UtxoMismatch { index });
            }
            tx.verify_credential(index, &utxo.owner)?;
        }
        Ok(())
    }

    fn atomic_ops(&self, _tx_id: &Hash) -> Result<(ChainId, AtomicRequests), AtomicTxError> {
        Ok((
            self.source_chain,
            AtomicRequests {
                put_requests: Vec::new(),
                remove_requests: self.input_ids().map(|id| id.to_vec()).collect(),
            },
        ))
    }

    fn apply_state_transfer(&self, state: &mut StateDb) -> Result<(), AtomicTxError> {
        for out in &self.outs {
            state.add_balance(out.address, out.asset_id, out.amount);
        }
        Ok(())
    }
}
