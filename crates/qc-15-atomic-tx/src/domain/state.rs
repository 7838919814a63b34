//! Account state the atomic state transfers read and write.
//!
//! Balances are tracked per (address, asset); the native asset doubles as the
//! EVM balance. Nonces are per address.

use super::errors::{Address, AssetId};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDb {
    balances: BTreeMap<(Address, AssetId), u64>,
    nonces: BTreeMap<Address, u64>,
}

impl StateDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &Address, asset_id: &AssetId) -> u64 {
        self.balances
            .get(&(*address, *asset_id))
            .copied()
            .unwrap_or(0)
    }

    /// Credit `amount`, saturating at `u64::MAX`.
    pub fn add_balance(&mut self, address: Address, asset_id: AssetId, amount: u64) {
        let entry = self.balances.entry((address, asset_id)).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Debit `amount`; returns the available balance on shortfall.
    pub fn sub_balance(
        &mut self,
        address: Address,
        asset_id: AssetId,
        amount: u64,
    ) -> Result<(), u64> {
        let available = self.balance(&address, &asset_id);
        if available < amount {
            return Err(available);
        }
        self.balances
            .insert((address, asset_id), available - amount);
        Ok(())
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.nonces.insert(address, nonce);
    }
}
