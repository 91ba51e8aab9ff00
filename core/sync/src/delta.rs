//! Accumulation of feed pages into one consistent delta.
//!
//! Merge rules within a pass:
//! - remove wins over add and modify, whatever the page order
//! - modify wins over add; the record ends up in `modified`
//! - a repeated add or modify replaces the representation in place
//! - output lists keep first-seen order

use std::collections::HashMap;
use tracing::debug;

use tallyfeed_common::{CanonicalTransaction, Delta, SyncCursor, TransactionId};

#[derive(Debug, Clone)]
enum Change {
    Added(CanonicalTransaction),
    Modified(CanonicalTransaction),
    Removed,
}

/// Builder for the delta of one sync pass.
#[derive(Debug, Default)]
pub struct DeltaBuilder {
    order: Vec<TransactionId>,
    changes: HashMap<TransactionId, Change>,
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, id: &TransactionId) -> Option<&mut Change> {
        self.changes.get_mut(id)
    }

    fn insert(&mut self, id: TransactionId, change: Change) {
        self.order.push(id.clone());
        self.changes.insert(id, change);
    }

    /// Record an added transaction.
    pub fn add(&mut self, tx: CanonicalTransaction) {
        let id = tx.transaction_id.clone();
        match self.slot(&id) {
            None => self.insert(id, Change::Added(tx)),
            Some(Change::Removed) => debug!("Ignoring add of removed transaction {}", id),
            Some(Change::Added(existing)) => *existing = tx,
            Some(Change::Modified(existing)) => *existing = tx,
        }
    }

    /// Record a modified transaction.
    pub fn modify(&mut self, tx: CanonicalTransaction) {
        let id = tx.transaction_id.clone();
        match self.slot(&id) {
            None => self.insert(id, Change::Modified(tx)),
            Some(Change::Removed) => debug!("Ignoring modify of removed transaction {}", id),
            Some(slot) => *slot = Change::Modified(tx),
        }
    }

    /// Record a removed transaction id.
    pub fn remove(&mut self, id: TransactionId) {
        match self.slot(&id) {
            None => self.insert(id, Change::Removed),
            Some(slot) => *slot = Change::Removed,
        }
    }

    /// Number of distinct transaction ids seen.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Consume the builder into the delta acknowledged by `cursor`.
    pub fn finish(mut self, cursor: SyncCursor) -> Delta {
        let mut delta = Delta::empty(cursor);
        for id in self.order {
            match self.changes.remove(&id) {
                Some(Change::Added(tx)) => delta.added.push(tx),
                Some(Change::Modified(tx)) => delta.modified.push(tx),
                Some(Change::Removed) => delta.removed.push(id),
                None => {}
            }
        }
        delta
    }
}
