//! In-memory cursor store for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::debug;

use tallyfeed_common::{
    CanonicalTransaction, Delta, Error, ItemId, Result, SyncCursor, TransactionId,
};

use crate::store::CursorStore;

#[derive(Debug, Default, Clone)]
struct ItemState {
    cursor: SyncCursor,
    transactions: HashMap<TransactionId, CanonicalTransaction>,
    tombstones: HashSet<TransactionId>,
    history: Vec<SyncCursor>,
}

impl ItemState {
    fn apply(&mut self, delta: &Delta) {
        for tx in delta.upserts() {
            if self.tombstones.contains(&tx.transaction_id) {
                debug!("Skipping tombstoned transaction {}", tx.transaction_id);
                continue;
            }
            self.transactions
                .insert(tx.transaction_id.clone(), tx.clone());
        }
        for id in &delta.removed {
            self.transactions.remove(id);
            self.tombstones.insert(id.clone());
        }
    }
}

/// In-memory cursor store.
///
/// Useful for testing and development. All data is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<ItemId, ItemState>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every cursor committed for `item`, oldest first. Resets record the
    /// beginning cursor.
    pub fn cursor_history(&self, item: &ItemId) -> Vec<SyncCursor> {
        self.items
            .read()
            .ok()
            .and_then(|items| items.get(item).map(|s| s.history.clone()))
            .unwrap_or_default()
    }

    /// Whether `id` has been tombstoned for `item`.
    pub fn is_tombstoned(&self, item: &ItemId, id: &TransactionId) -> bool {
        self.items
            .read()
            .ok()
            .and_then(|items| items.get(item).map(|s| s.tombstones.contains(id)))
            .unwrap_or(false)
    }
}

fn poisoned() -> Error {
    Error::Storage("memory store lock poisoned".to_string())
}

#[async_trait]
impl CursorStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, item: &ItemId) -> Result<SyncCursor> {
        let items = self.items.read().map_err(|_| poisoned())?;
        Ok(items
            .get(item)
            .map(|s| s.cursor.clone())
            .unwrap_or_default())
    }

    async fn commit_delta_and_cursor(
        &self,
        item: &ItemId,
        delta: &Delta,
        cursor: &SyncCursor,
    ) -> Result<()> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        let state = items.entry(item.clone()).or_default();
        state.apply(delta);
        state.cursor = cursor.clone();
        state.history.push(cursor.clone());
        debug!("Committed {} changes for {} at {}", delta.len(), item, cursor);
        Ok(())
    }

    async fn reset(&self, item: &ItemId) -> Result<()> {
        let mut items = self.items.write().map_err(|_| poisoned())?;
        let state = items.entry(item.clone()).or_default();
        state.cursor = SyncCursor::beginning();
        state.history.push(SyncCursor::beginning());
        Ok(())
    }

    async fn transactions(&self, item: &ItemId) -> Result<Vec<CanonicalTransaction>> {
        let items = self.items.read().map_err(|_| poisoned())?;
        let mut transactions: Vec<CanonicalTransaction> = items
            .get(item)
            .map(|s| s.transactions.values().cloned().collect())
            .unwrap_or_default();
        transactions.sort_by(|a, b| {
            a.posted_date
                .cmp(&b.posted_date)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        Ok(transactions)
    }
}
