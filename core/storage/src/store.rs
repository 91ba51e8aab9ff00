//! Cursor store trait definition.

use async_trait::async_trait;

use tallyfeed_common::{CanonicalTransaction, Delta, ItemId, Result, SyncCursor};

/// Durable per-item cursor plus the transaction set it acknowledges.
///
/// The store is the only shared mutable resource of the sync core. Callers
/// must serialize commits per item; implementations only guarantee that
/// each commit is atomic.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Get the store name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Last committed cursor for `item`.
    ///
    /// # Postconditions
    /// - Returns the beginning cursor for items never committed
    async fn load(&self, item: &ItemId) -> Result<SyncCursor>;

    /// Apply `delta` and record `cursor`, atomically.
    ///
    /// # Postconditions
    /// - Added and modified records are upserted unless tombstoned
    /// - Removed ids are deleted and tombstoned
    /// - `load(item)` returns `cursor`
    ///
    /// # Errors
    /// - Persistence failure; nothing is applied in that case
    async fn commit_delta_and_cursor(
        &self,
        item: &ItemId,
        delta: &Delta,
        cursor: &SyncCursor,
    ) -> Result<()>;

    /// Rewind `item` to the beginning for an explicit re-sync.
    ///
    /// Stored transactions and tombstones are kept; the re-delivered history
    /// is absorbed by idempotent upsert.
    async fn reset(&self, item: &ItemId) -> Result<()>;

    /// Live transactions of `item`, ordered by posting date then id.
    async fn transactions(&self, item: &ItemId) -> Result<Vec<CanonicalTransaction>>;
}
