//! Per-item sync coordination: load cursor, run a pass, commit.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tallyfeed_common::{ItemCredential, ItemId, Result};
use tallyfeed_feed::FeedClient;
use tallyfeed_storage::CursorStore;

use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncOutcome};

/// Runs sync passes and commits their results to a [`CursorStore`].
///
/// At most one pass per item is in flight; passes for different items run
/// concurrently.
pub struct SyncCoordinator<F: FeedClient + ?Sized, S: CursorStore + ?Sized> {
    engine: SyncEngine<F>,
    store: Arc<S>,
    locks: Mutex<HashMap<ItemId, Arc<Mutex<()>>>>,
}

impl<F, S> SyncCoordinator<F, S>
where
    F: FeedClient + ?Sized,
    S: CursorStore + ?Sized,
{
    pub fn new(feed: Arc<F>, store: Arc<S>, config: SyncConfig) -> Self {
        Self {
            engine: SyncEngine::from_arc(feed, config),
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &SyncEngine<F> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn item_lock(&self, item: &ItemId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(item.clone()).or_default().clone()
    }

    /// Bring `item` up to date from its committed cursor.
    ///
    /// A complete pass commits its delta and cursor together. A stalled pass
    /// commits whatever it got before the stall, then reports `Stalled`. A
    /// failed pass commits nothing.
    pub async fn sync(
        &self,
        item: &ItemId,
        credential: &ItemCredential,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let lock = self.item_lock(item).await;
        let _guard = lock.lock().await;
        self.sync_locked(item, credential, cancel).await
    }

    /// Rewind `item` to the beginning, then sync its full history.
    pub async fn resync(
        &self,
        item: &ItemId,
        credential: &ItemCredential,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let lock = self.item_lock(item).await;
        let _guard = lock.lock().await;
        info!("Re-syncing {} from the beginning", item);
        self.store.reset(item).await?;
        self.sync_locked(item, credential, cancel).await
    }

    async fn sync_locked(
        &self,
        item: &ItemId,
        credential: &ItemCredential,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let start = self.store.load(item).await?;
        let outcome = self
            .engine
            .sync(item, credential, start.clone(), cancel)
            .await?;

        let delta = outcome.delta();
        if delta.is_empty() && delta.next_cursor == start {
            debug!("{} is up to date at {}", item, start);
        } else {
            self.store
                .commit_delta_and_cursor(item, delta, &delta.next_cursor)
                .await?;
            debug!("Committed {} changes for {} at {}", delta.len(), item, delta.next_cursor);
        }

        if let SyncOutcome::Stalled(stalled) = &outcome {
            warn!(
                "{} stalled after {} empty-cursor pages; try again later",
                item, stalled.stalled_fetches
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tallyfeed_common::{Error, SyncCursor, TransactionId};
    use tallyfeed_feed::{RawTransaction, ScriptedFeed};
    use tallyfeed_storage::MemoryStore;

    fn raw(id: &str) -> RawTransaction {
        RawTransaction::new(id, "acc", 12.5, "2024-05-01")
    }

    fn item() -> ItemId {
        ItemId::new("item-1").unwrap()
    }

    fn cred() -> ItemCredential {
        ItemCredential::new("access-sandbox-1")
    }

    fn coordinator(feed: ScriptedFeed) -> SyncCoordinator<ScriptedFeed, MemoryStore> {
        let config = SyncConfig::default().with_stall_delay(Duration::ZERO);
        SyncCoordinator::new(Arc::new(feed), Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn test_sync_commits_delta_and_cursor() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("a"), raw("b")], vec![], vec![], true);
        let c2 = feed.push_page(vec![], vec![], vec!["a"], false);
        let coordinator = coordinator(feed);

        let outcome = coordinator.sync(&item(), &cred(), &CancellationToken::new()).await.unwrap();
        assert!(outcome.is_complete());

        let store = coordinator.store();
        assert_eq!(store.load(&item()).await.unwrap(), c2);
        let stored = store.transactions(&item()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].transaction_id.as_str(), "b");
        assert!(store.is_tombstoned(&item(), &TransactionId::new("a")));
    }

    #[tokio::test]
    async fn test_repeated_sync_is_idempotent() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("a")], vec![], vec![], false);
        let coordinator = coordinator(feed);
        let cancel = CancellationToken::new();

        coordinator.sync(&item(), &cred(), &cancel).await.unwrap();
        let before = coordinator.store().transactions(&item()).await.unwrap();
        let second = coordinator.sync(&item(), &cred(), &cancel).await.unwrap();

        assert!(second.delta().is_empty());
        assert_eq!(coordinator.store().transactions(&item()).await.unwrap(), before);
        assert_eq!(coordinator.store().cursor_history(&item()).len(), 1);
    }

    #[tokio::test]
    async fn test_cursor_only_moves_forward() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![raw("a")], vec![], vec![], false);
        let coordinator = coordinator(feed);
        let cancel = CancellationToken::new();

        coordinator.sync(&item(), &cred(), &cancel).await.unwrap();
        let c2 = coordinator.engine().feed().push_page(vec![raw("b")], vec![], vec![], true);
        let c3 = coordinator.engine().feed().push_page(vec![], vec![raw("a")], vec![], false);
        coordinator.sync(&item(), &cred(), &cancel).await.unwrap();

        assert_eq!(coordinator.store().cursor_history(&item()), vec![c1, c3]);
        assert_ne!(coordinator.store().load(&item()).await.unwrap(), c2);
    }

    #[tokio::test]
    async fn test_failed_pass_commits_nothing() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("a")], vec![], vec![], true);
        let c2 = feed.push_page(vec![raw("b")], vec![], vec![], false);
        feed.fail_at("c1", 1).unwrap();
        let coordinator = coordinator(feed);
        let cancel = CancellationToken::new();

        let err = coordinator.sync(&item(), &cred(), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::FeedFetchFailed { .. }));
        assert!(coordinator.store().load(&item()).await.unwrap().is_beginning());
        assert!(coordinator.store().transactions(&item()).await.unwrap().is_empty());

        coordinator.sync(&item(), &cred(), &cancel).await.unwrap();
        assert_eq!(coordinator.store().load(&item()).await.unwrap(), c2);
        assert_eq!(coordinator.store().transactions(&item()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stalled_pass_commits_partial_progress() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![raw("a")], vec![], vec![], true);
        let c2 = feed.push_page(vec![raw("b")], vec![], vec![], false);
        feed.stall_at("c1", 3).unwrap();
        let config = SyncConfig::default()
            .with_stall_delay(Duration::ZERO)
            .with_max_stall_retries(1);
        let coordinator =
            SyncCoordinator::new(Arc::new(feed), Arc::new(MemoryStore::new()), config);
        let cancel = CancellationToken::new();

        let outcome = coordinator.sync(&item(), &cred(), &cancel).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Stalled(_)));
        assert_eq!(coordinator.store().load(&item()).await.unwrap(), c1);

        // One stall left, within budget now.
        let outcome = coordinator.sync(&item(), &cred(), &cancel).await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(coordinator.store().load(&item()).await.unwrap(), c2);
        assert_eq!(coordinator.store().transactions(&item()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_passes_for_one_item_are_serialized() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![raw("a")], vec![], vec![], false);
        let coordinator = coordinator(feed);
        let cancel = CancellationToken::new();
        let (item, cred) = (item(), cred());

        let (first, second) = futures::join!(
            coordinator.sync(&item, &cred, &cancel),
            coordinator.sync(&item, &cred, &cancel)
        );
        first.unwrap();
        second.unwrap();

        // The second pass starts from the cursor the first one committed.
        assert_eq!(
            coordinator.engine().feed().requests(),
            vec![SyncCursor::beginning(), c1.clone()]
        );
        assert_eq!(coordinator.store().cursor_history(&item), vec![c1]);
    }

    #[tokio::test]
    async fn test_items_are_independent() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("a")], vec![], vec![], false);
        let coordinator = coordinator(feed);
        let cancel = CancellationToken::new();
        let other = ItemId::new("item-2").unwrap();
        let (item, cred) = (item(), cred());

        let (first, second) = futures::join!(
            coordinator.sync(&item, &cred, &cancel),
            coordinator.sync(&other, &cred, &cancel)
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(coordinator.store().transactions(&item).await.unwrap().len(), 1);
        assert_eq!(coordinator.store().transactions(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resync_replays_history() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("a"), raw("b")], vec![], vec![], true);
        let c2 = feed.push_page(vec![], vec![], vec!["a"], false);
        let coordinator = coordinator(feed);
        let cancel = CancellationToken::new();

        coordinator.sync(&item(), &cred(), &cancel).await.unwrap();
        let outcome = coordinator.resync(&item(), &cred(), &cancel).await.unwrap();

        assert_eq!(outcome.delta().next_cursor, c2);
        let requests = coordinator.engine().feed().requests();
        assert_eq!(requests.iter().filter(|c| c.is_beginning()).count(), 2);
        let stored = coordinator.store().transactions(&item()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].transaction_id.as_str(), "b");
    }
}
