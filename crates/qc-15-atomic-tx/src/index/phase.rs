//! Lifecycle of the public `index` entry point.
//!
//! ```text
//! Rebuilding --(rebuild outcome observed)--> Draining --(buffer empty)--> Steady
//! ```
//!
//! Buffered heights are drained in `HashMap` iteration order. No height
//! order is guaranteed among them; all of them are applied before the height
//! of the call that triggered the drain.

use crate::domain::{AtomicOps, IndexError};
use std::collections::HashMap;

#[derive(Debug)]
pub enum Phase {
    /// Rebuild not yet observed complete. Calls are buffered by height.
    Rebuilding { pending: HashMap<u64, AtomicOps> },
    /// Rebuild complete; the buffer is being applied.
    Draining { pending: HashMap<u64, AtomicOps> },
    /// Calls apply directly.
    Steady,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Rebuilding {
            pending: HashMap::new(),
        }
    }
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Rebuilding { .. } => "rebuilding",
            Phase::Draining { .. } => "draining",
            Phase::Steady => "steady",
        }
    }

    pub fn is_steady(&self) -> bool {
        matches!(self, Phase::Steady)
    }

    /// Heights waiting to be applied.
    pub fn buffered(&self) -> usize {
        match self {
            Phase::Rebuilding { pending } | Phase::Draining { pending } => pending.len(),
            Phase::Steady => 0,
        }
    }

    /// Buffer `ops` for `height`. Only valid while rebuilding.
    pub(super) fn buffer(&mut self, height: u64, ops: AtomicOps) -> Result<(), IndexError> {
        let Phase::Rebuilding { pending } = self else {
            return Ok(());
        };
        if pending.contains_key(&height) {
            return Err(IndexError::DuplicatePendingHeight(height));
        }
        pending.insert(height, ops);
        Ok(())
    }

    /// Move a rebuilding buffer into the draining state.
    pub(super) fn begin_drain(&mut self) {
        if let Phase::Rebuilding { pending } = self {
            let pending = std::mem::take(pending);
            *self = Phase::Draining { pending };
        }
    }

    /// Apply every buffered height through `step`, in map order.
    ///
    /// A failed height stays buffered together with the ones not yet
    /// reached; the phase remains `Draining` so the next call retries them.
    pub(super) fn drain(
        &mut self,
        mut step: impl FnMut(u64, &AtomicOps) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let Phase::Draining { pending } = self else {
            return Ok(());
        };

        let heights: Vec<u64> = pending.keys().copied().collect();
        for height in heights {
            let Some(ops) = pending.remove(&height) else {
                continue;
            };
            if let Err(e) = step(height, &ops) {
                pending.insert(height, ops);
                return Err(e);
            }
        }

        *self = Phase::Steady;
        Ok(())
    }
}
