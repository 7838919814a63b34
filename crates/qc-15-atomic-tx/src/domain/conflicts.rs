//! Ancestor conflict detection for import transactions.
//!
//! Walks from the parent toward the chain tip's accepted prefix. Every
//! ancestor that is not yet accepted and carries an atomic transaction must
//! consume none of the candidate's inputs. The walk stops at the first
//! accepted ancestor or at an unresolvable one.

use super::block::{BlockLookup, ParentRef};
use super::errors::{BlockError, BlockId, Hash};
use super::value_objects::BlockStatus;
use shared_types::short_hex;
use std::collections::BTreeSet;

/// Fail if any processing ancestor of `parent_id` consumes one of `inputs`.
pub fn check_ancestor_conflicts(
    lookup: &impl BlockLookup,
    parent_id: &BlockId,
    inputs: &BTreeSet<Hash>,
) -> Result<(), BlockError> {
    let mut ancestor = lookup.lookup(parent_id);

    while ancestor.status() != BlockStatus::Accepted {
        let block = match ancestor {
            ParentRef::Found(block) => block,
            ParentRef::Missing(_) => return Ok(()),
        };

        if let Some(tx) = block.atomic_tx() {
            if !tx.consumed_inputs().is_disjoint(inputs) {
                return Err(BlockError::ConflictingAtomicInputs {
                    ancestor: short_hex(&block.id()),
                });
            }
        }
        ancestor = lookup.lookup(&block.parent_id());
    }
    Ok(())
}
