//! Result of one synchronization pass.

use serde::{Deserialize, Serialize};

use crate::transaction::CanonicalTransaction;
use crate::types::{SyncCursor, TransactionId};

/// Added, modified and removed transactions observed by one sync pass,
/// together with the cursor that acknowledges them.
///
/// A transaction id appears at most once across the three lists. The delta
/// is applied by idempotent upsert, so applying it twice is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub added: Vec<CanonicalTransaction>,
    pub modified: Vec<CanonicalTransaction>,
    pub removed: Vec<TransactionId>,
    pub next_cursor: SyncCursor,
}

impl Delta {
    /// Empty delta acknowledging `cursor`.
    pub fn empty(cursor: SyncCursor) -> Self {
        Self {
            next_cursor: cursor,
            ..Self::default()
        }
    }

    /// Whether the delta carries no record changes.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total number of record changes.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Transactions to upsert, added first.
    pub fn upserts(&self) -> impl Iterator<Item = &CanonicalTransaction> {
        self.added.iter().chain(self.modified.iter())
    }
}
