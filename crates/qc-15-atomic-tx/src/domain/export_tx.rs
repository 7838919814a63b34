//! Export: debit accounts on this chain and leave UTXOs in a destination
//! chain's shared memory.

use super::errors::{Address, AssetId, AtomicTxError, ChainId, Hash};
use super::state::StateDb;
use super::tx::{AtomicTx, AtomicTxBody, FlowChecker, VerifyContext};
use super::value_objects::{AtomicConfig, AtomicRequests, Element, Utxo, UtxoId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Debit of an account on this chain, authorized by its nonce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmInput {
    pub address: Address,
    pub amount: u64,
    pub asset_id: AssetId,
    pub nonce: u64,
}

impl EvmInput {
    /// Conflict identifier: sha256(address ∥ nonce).
    pub fn input_id(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.address);
        hasher.update(self.nonce.to_be_bytes());
        hasher.finalize().into()
    }
}

/// Output created in the destination chain's shared memory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableOutput {
    pub asset_id: AssetId,
    pub amount: u64,
    pub owner: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedExportTx {
    pub network_id: u32,
    pub blockchain_id: ChainId,
    pub destination_chain: ChainId,
    pub ins: Vec<EvmInput>,
    pub exported_outputs: Vec<TransferableOutput>,
}

impl AtomicTxBody for UnsignedExportTx {
    fn consumed_inputs(&self) -> BTreeSet<Hash> {
        self.ins.iter().map(EvmInput::input_id).collect()
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
        if self.destination_chain == config.blockchain_id {
            return Err(AtomicTxError::SameChain);
        }
        if self.exported_outputs.is_empty() {
            return Err(AtomicTxError::NoExportOutputs);
        }

        for input in &self.ins {
            if input.amount == 0 {
                return Err(AtomicTxError::ZeroValue("input"));
            }
            if input.asset_id == [0u8; 32] {
                return Err(AtomicTxError::EmptyAssetId("input"));
            }
        }
        for out in &self.exported_outputs {
            if out.amount == 0 {
                return Err(AtomicTxError::ZeroValue("output"));
            }
            if out.asset_id == [0u8; 32] {
                return Err(AtomicTxError::EmptyAssetId("output"));
            }
        }
        Ok(())
    }

    fn semantic_verify(
        &self,
        ctx: &VerifyContext<'_>,
        tx: &AtomicTx,
    ) -> Result<(), AtomicTxError> {
        if tx.credentials().len() != self.ins.len() {
            return Err(AtomicTxError::CredentialCountMismatch {
                expected: self.ins.len(),
                got: tx.credentials().len(),
            });
        }

        let mut flow = FlowChecker::new();
        for input in &self.ins {
            flow.consume(input.asset_id, input.amount);
        }
        for out in &self.exported_outputs {
            flow.produce(out.asset_id, out.amount);
        }
        flow.produce(ctx.config.native_asset_id, tx.fee(ctx.config)?);
        flow.verify()?;

        for (index, input) in self.ins.iter().enumerate() {
            tx.verify_credential(index, &input.address)?;
        }
        Ok(())
    }

    fn atomic_ops(&self, tx_id: &Hash) -> Result<(ChainId, AtomicRequests), AtomicTxError> {
        let mut put_requests = Vec::with_capacity(self.exported_outputs.len());
        for (index, out) in self.exported_outputs.iter().enumerate() {
            let utxo = Utxo {
                utxo_id: UtxoId {
                    tx_id: *tx_id,
                    output_index: index as u32,
                },
                asset_id: out.asset_id,
                amount: out.amount,
                owner: out.owner,
            };
            put_requests.push(Element {
                key: utxo.utxo_id.input_id().to_vec(),
                value: utxo.encode()?,
                traits: vec![out.owner.to_vec()],
            });
        }

        Ok((
            self.destination_chain,
            AtomicRequests {
                put_requests,
                remove_requests: Vec::new(),
            },
        ))
    }

    fn apply_state_transfer(&self, state: &mut StateDb) -> Result<(), AtomicTxError> {
        for input in &self.ins {
            let expected = state.nonce(&input.address);
            if input.nonce != expected {
                return Err(AtomicTxError::NonceMismatch {
                    address: hex::encode(input.address),
                    expected,
                    got: input.nonce,
                });
            }
            state
                .sub_balance(input.address, input.asset_id, input.amount)
                .map_err(|available| AtomicTxError::InsufficientBalance {
                    address: hex::encode(input.address),
                    available,
                    required: input.amount,
                })?;
            state.set_nonce(input.address, expected + 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(nonce: u64, amount: u64) -> UnsignedExportTx {
        let config = AtomicConfig::default();
        UnsignedExportTx {
            network_id: config.network_id,
            blockchain_id: config.blockchain_id,
            destination_chain: [2u8; 32],
            ins: vec![EvmInput {
                address: [4u8; 20],
                amount,
                asset_id: config.native_asset_id,
                nonce,
            }],
            exported_outputs: vec![TransferableOutput {
                asset_id: config.native_asset_id,
                amount: 1,
                owner: [6u8; 20],
            }],
        }
    }

    #[test]
    fn test_state_transfer_checks_nonce_and_balance() {
        let mut state = StateDb::new();
        state.add_balance([4u8; 20], [0xAA; 32], 100);

        assert!(matches!(
            export(1, 10).apply_state_transfer(&mut state.clone()),
            Err(AtomicTxError::NonceMismatch { expected: 0, got: 1, .. })
        ));
        assert!(matches!(
            export(0, 101).apply_state_transfer(&mut state.clone()),
            Err(AtomicTxError::InsufficientBalance { available: 100, .. })
        ));

        export(0, 10).apply_state_transfer(&mut state).unwrap();
        assert_eq!(state.balance(&[4u8; 20], &[0xAA; 32]), 90);
        assert_eq!(state.nonce(&[4u8; 20]), 1);
    }

    #[test]
    fn test_atomic_ops_put_utxos_for_destination() {
        let tx = export(0, 10);
        let tx_id = [9u8; 32];
        let (chain, requests) = tx.atomic_ops(&tx_id).unwrap();

        assert_eq!(chain, [2u8; 32]);
        assert_eq!(requests.put_requests.len(), 1);
        let element = &requests.put_requests[0];
        let utxo = Utxo::decode(&element.value).unwrap();
        assert_eq!(utxo.utxo_id, UtxoId { tx_id, output_index: 0 });
        assert_eq!(element.key, utxo.utxo_id.input_id().to_vec());
        assert_eq!(element.traits, vec![[6u8; 20].to_vec()]);
    }

    #[test]
    fn test_consumed_inputs_keyed_by_nonce() {
        assert_ne!(
            export(0, 10).consumed_inputs(),
            export(1, 10).consumed_inputs()
        );
    }

    #[test]
    fn test_verify_requires_outputs() {
        let mut tx = export(0, 10);
        tx.exported_outputs.clear();
        assert_eq!(
            tx.verify(&AtomicConfig::default()),
            Err(AtomicTxError::NoExportOutputs)
        );
    }
}
