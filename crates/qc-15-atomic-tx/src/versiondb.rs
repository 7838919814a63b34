//! # Versioned Database
//!
//! Stages writes in memory on top of a base store until they are committed.
//! Block acceptance runs inside a [`CommitSection`]: everything written while
//! the section is open reaches the base store together, or not at all.
//!
//! ## Batches
//!
//! [`CommitSection::commit_batch`] hands the staged writes to shared memory
//! as a [`CommitBatch`], so they land atomically with the cross-chain
//! requests. The batch holds the store's exclusive lock until dropped:
//!
//! - calls from the thread that owns the batch fail with
//!   [`StorageError::BatchInProgress`] instead of deadlocking
//! - calls from other threads wait for the batch to end
//!
//! Staged writes are visible only to the thread that opened the section.
//! Readers on other threads, such as the index rebuild, see committed state.

use crate::domain::StorageError;
use crate::ports::{BatchOperation, KeyValueStore, ScanResult};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::thread::{self, ThreadId};
use tracing::debug;

/// Staged value; `None` is a pending delete.
type Pending = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub struct VersionDb<S> {
    base: S,
    pending: Mutex<Pending>,
    section_owner: Mutex<Option<ThreadId>>,
    gate: RwLock<()>,
    batch_owner: Mutex<Option<ThreadId>>,
}

impl<S: KeyValueStore> VersionDb<S> {
    pub fn new(base: S) -> Self {
        Self {
            base,
            pending: Mutex::new(BTreeMap::new()),
            section_owner: Mutex::new(None),
            gate: RwLock::new(()),
            batch_owner: Mutex::new(None),
        }
    }

    fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, StorageError> {
        if *self.batch_owner.lock() == Some(thread::current().id()) {
            return Err(StorageError::BatchInProgress);
        }
        Ok(self.gate.read())
    }

    /// Staged writes are hidden from threads other than the section owner.
    fn sees_pending(&self) -> bool {
        self.section_owner
            .lock()
            .map_or(true, |owner| owner == thread::current().id())
    }

    /// Number of staged writes.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Flush staged writes to the base store.
    pub fn commit(&self) -> Result<(), StorageError> {
        let _gate = self.enter()?;
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        self.base.atomic_batch_write(to_operations(&pending))?;
        pending.clear();
        Ok(())
    }

    /// Discard staged writes.
    pub fn abort_commit(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            debug!("[qc-15] Discarding {} staged writes", pending.len());
            pending.clear();
        }
    }

    /// Open a commit section. Staged writes are discarded when the section
    /// is dropped without being committed.
    pub fn start_commit(&self) -> Result<CommitSection<'_, S>, StorageError> {
        let mut owner = self.section_owner.lock();
        if owner.is_some() {
            return Err(StorageError::CommitInProgress);
        }
        *owner = Some(thread::current().id());
        Ok(CommitSection {
            db: self,
            committed: false,
        })
    }
}

fn to_operations(pending: &Pending) -> Vec<BatchOperation> {
    pending
        .iter()
        .map(|(key, value)| match value {
            Some(value) => BatchOperation::put(key.clone(), value.clone()),
            None => BatchOperation::delete(key.clone()),
        })
        .collect()
}

impl<S: KeyValueStore> KeyValueStore for VersionDb<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let _gate = self.enter()?;
        if self.sees_pending() {
            if let Some(staged) = self.pending.lock().get(key) {
                return Ok(staged.clone());
            }
        }
        self.base.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let _gate = self.enter()?;
        self.pending
            .lock()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let _gate = self.enter()?;
        self.pending.lock().insert(key.to_vec(), None);
        Ok(())
    }

    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError> {
        let _gate = self.enter()?;
        let mut pending = self.pending.lock();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => pending.insert(key, Some(value)),
                BatchOperation::Delete { key } => pending.insert(key, None),
            };
        }
        Ok(())
    }

    fn scan_from(&self, start: &[u8]) -> Result<ScanResult, StorageError> {
        let _gate = self.enter()?;
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.scan_from(start)?.into_iter().collect();
        if !self.sees_pending() {
            return Ok(merged.into_iter().collect());
        }

        let pending = self.pending.lock();
        for (key, value) in pending.range::<[u8], _>((Bound::Included(start), Bound::Unbounded)) {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }
}

/// Open commit section. Dropping it without [`commit`](Self::commit) aborts.
pub struct CommitSection<'a, S: KeyValueStore> {
    db: &'a VersionDb<S>,
    committed: bool,
}

impl<'a, S: KeyValueStore> CommitSection<'a, S> {
    /// Flush staged writes and close the section.
    pub fn commit(mut self) -> Result<(), StorageError> {
        self.db.commit()?;
        self.committed = true;
        Ok(())
    }

    /// Move the staged writes into an exclusive batch.
    ///
    /// Until the batch is dropped, calls into the store from this thread fail
    /// with [`StorageError::BatchInProgress`].
    pub fn commit_batch(&mut self) -> Result<CommitBatch<'_>, StorageError> {
        let gate = self.db.gate.write();
        *self.db.batch_owner.lock() = Some(thread::current().id());

        let operations = {
            let mut pending = self.db.pending.lock();
            let operations = to_operations(&pending);
            pending.clear();
            operations
        };
        self.committed = true;

        Ok(CommitBatch {
            operations,
            base: &self.db.base,
            owner: &self.db.batch_owner,
            _gate: gate,
        })
    }
}

impl<S: KeyValueStore> Drop for CommitSection<'_, S> {
    fn drop(&mut self) {
        if !self.committed {
            self.db.abort_commit();
        }
        *self.db.section_owner.lock() = None;
    }
}

/// Staged writes of one commit section, holding the store's exclusive lock.
pub struct CommitBatch<'a> {
    operations: Vec<BatchOperation>,
    base: &'a dyn KeyValueStore,
    owner: &'a Mutex<Option<ThreadId>>,
    _gate: RwLockWriteGuard<'a, ()>,
}

impl CommitBatch<'_> {
    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    /// Write the batch to the base store and release the lock.
    pub fn write(mut self) -> Result<(), StorageError> {
        let operations = std::mem::take(&mut self.operations);
        self.base.atomic_batch_write(operations)
    }
}

impl Drop for CommitBatch<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}
