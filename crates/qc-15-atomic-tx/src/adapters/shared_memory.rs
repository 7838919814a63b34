//! In-memory shared cross-chain memory.
//!
//! Two directions per peer chain: `inbound` holds what the peer exported to
//! this chain (imports read and remove it), `outbound` holds what this chain
//! exported to the peer (exports put it).

use crate::domain::{AtomicOps, ChainId, Element, StorageError};
use crate::ports::SharedMemory;
use crate::versiondb::CommitBatch;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

type Region = BTreeMap<Vec<u8>, Element>;

#[derive(Default)]
struct Regions {
    inbound: HashMap<ChainId, Region>,
    outbound: HashMap<ChainId, Region>,
}

#[derive(Default)]
pub struct InMemorySharedMemory {
    regions: RwLock<Regions>,
}

impl InMemorySharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an element `peer_chain` exported to this chain.
    pub fn seed_inbound(&self, peer_chain: ChainId, element: Element) {
        self.regions
            .write()
            .inbound
            .entry(peer_chain)
            .or_default()
            .insert(element.key.clone(), element);
    }

    /// Element this chain exported to `peer_chain`.
    pub fn outbound(&self, peer_chain: &ChainId, key: &[u8]) -> Option<Element> {
        self.regions
            .read()
            .outbound
            .get(peer_chain)
            .and_then(|region| region.get(key).cloned())
    }

    pub fn inbound_len(&self, peer_chain: &ChainId) -> usize {
        self.regions
            .read()
            .inbound
            .get(peer_chain)
            .map_or(0, BTreeMap::len)
    }
}

impl SharedMemory for InMemorySharedMemory {
    fn get(
        &self,
        peer_chain: &ChainId,
        keys: &[Vec<u8>],
    ) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let regions = self.regions.read();
        let region = regions.inbound.get(peer_chain);
        Ok(keys
            .iter()
            .map(|key| region.and_then(|r| r.get(key)).map(|e| e.value.clone()))
            .collect())
    }

    fn apply(&self, requests: &AtomicOps, batch: CommitBatch<'_>) -> Result<(), StorageError> {
        let mut regions = self.regions.write();

        for (chain_id, chain_requests) in requests {
            let region = regions.inbound.get(chain_id);
            for key in &chain_requests.remove_requests {
                if region.map_or(true, |r| !r.contains_key(key)) {
                    return Err(StorageError::DatabaseError(format!(
                        "shared memory element {} not found",
                        hex::encode(key)
                    )));
                }
            }
        }

        batch.write()?;

        for (chain_id, chain_requests) in requests {
            if let Some(region) = regions.inbound.get_mut(chain_id) {
                for key in &chain_requests.remove_requests {
                    region.remove(key);
                }
            }
            let region = regions.outbound.entry(*chain_id).or_default();
            for element in &chain_requests.put_requests {
                region.insert(element.key.clone(), element.clone());
            }
            debug!(
                "[qc-15] Applied {} puts, {} removes for chain {}",
                chain_requests.put_requests.len(),
                chain_requests.remove_requests.len(),
                shared_types::short_hex(chain_id)
            );
        }
        Ok(())
    }
}
