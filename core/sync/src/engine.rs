//! Sync engine walking an item's change feed.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tallyfeed_common::{Delta, Error, ItemCredential, ItemId, Result, SyncCursor};
use tallyfeed_feed::{FeedClient, PageResult};

use crate::config::SyncConfig;
use crate::delta::DeltaBuilder;
use crate::normalize::normalize;
use crate::retry::sleep_cancellable;

/// A pass that gave up waiting for the upstream to publish a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct StalledSync {
    /// Changes accumulated before the stall. Its `next_cursor` is the last
    /// cursor the upstream acknowledged, so committing it is safe.
    pub delta: Delta,
    /// Consecutive fetches that came back without a cursor.
    pub stalled_fetches: u32,
}

/// Result of one sync pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The feed reported no more data.
    Complete(Delta),
    /// The upstream was still publishing; try again later.
    Stalled(StalledSync),
}

impl SyncOutcome {
    pub fn delta(&self) -> &Delta {
        match self {
            SyncOutcome::Complete(delta) => delta,
            SyncOutcome::Stalled(stalled) => &stalled.delta,
        }
    }

    pub fn into_delta(self) -> Delta {
        match self {
            SyncOutcome::Complete(delta) => delta,
            SyncOutcome::Stalled(stalled) => stalled.delta,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SyncOutcome::Complete(_))
    }
}

/// Drives a [`FeedClient`] across pages and merges them into one delta.
///
/// The engine is stateless between passes. Persisting the delta and its
/// cursor is the caller's job.
pub struct SyncEngine<F: FeedClient + ?Sized> {
    feed: Arc<F>,
    config: SyncConfig,
}

impl<F: FeedClient> SyncEngine<F> {
    /// Create a new sync engine.
    pub fn new(feed: F, config: SyncConfig) -> Self {
        Self::from_arc(Arc::new(feed), config)
    }
}

impl<F: FeedClient + ?Sized> SyncEngine<F> {
    /// Create a new sync engine from an Arc-wrapped feed.
    pub fn from_arc(feed: Arc<F>, config: SyncConfig) -> Self {
        Self { feed, config }
    }

    pub fn feed(&self) -> &Arc<F> {
        &self.feed
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one pass starting at `start`.
    ///
    /// Pages are fetched strictly in cursor-chain order until one reports no
    /// more data. A page without a cursor is discarded and refetched after
    /// `stall_delay`, at most `max_stall_retries` times in a row.
    ///
    /// # Errors
    /// - [`Error::FeedFetchFailed`] if a page cannot be fetched
    /// - [`Error::InvalidRecord`] if a page carries an unparseable record
    /// - [`Error::Cancelled`] if `cancel` fires
    pub async fn sync(
        &self,
        item: &ItemId,
        credential: &ItemCredential,
        start: SyncCursor,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        debug!("Starting sync for {} from {}", item, start);

        let mut builder = DeltaBuilder::new();
        let mut cursor = start;
        let mut stalled_fetches: u32 = 0;
        let mut pages: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let page = self
                .feed
                .fetch_page(credential, &cursor)
                .await
                .map_err(|e| Error::FeedFetchFailed {
                    item: item.to_string(),
                    cursor: cursor.as_str().to_string(),
                    message: e.to_string(),
                })?;

            if page.next_cursor.is_beginning() {
                stalled_fetches += 1;
                if stalled_fetches > self.config.max_stall_retries {
                    warn!(
                        "Item {} stalled at {} after {} empty-cursor pages",
                        item, cursor, stalled_fetches
                    );
                    return Ok(SyncOutcome::Stalled(StalledSync {
                        delta: builder.finish(cursor),
                        stalled_fetches,
                    }));
                }

                debug!(
                    "Empty cursor for {} at {} ({}/{}). Waiting {:?}...",
                    item, cursor, stalled_fetches, self.config.max_stall_retries, self.config.stall_delay
                );
                sleep_cancellable(self.config.stall_delay, cancel).await?;
                continue;
            }
            stalled_fetches = 0;

            merge_page(&mut builder, &page)?;
            pages += 1;
            cursor = page.next_cursor;

            if !page.has_more {
                break;
            }
        }

        let delta = builder.finish(cursor);
        info!(
            "Synced {} in {} pages: {} added, {} modified, {} removed",
            item,
            pages,
            delta.added.len(),
            delta.modified.len(),
            delta.removed.len()
        );
        Ok(SyncOutcome::Complete(delta))
    }
}

/// Normalize a whole page, then fold it into `builder`.
///
/// Normalizing first keeps a page with a bad record from being half merged.
fn merge_page(builder: &mut DeltaBuilder, page: &PageResult) -> Result<()> {
    let added = page.added.iter().map(normalize).collect::<Result<Vec<_>>>()?;
    let modified = page
        .modified
        .iter()
        .map(normalize)
        .collect::<Result<Vec<_>>>()?;

    for tx in added {
        builder.add(tx);
    }
    for tx in modified {
        builder.modify(tx);
    }
    for id in &page.removed {
        builder.remove(id.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tallyfeed_common::TransactionId;
    use tallyfeed_feed::{RawTransaction, ScriptedFeed};
    use tokio::time::Instant;

    fn raw(id: &str, amount: f64) -> RawTransaction {
        RawTransaction::new(id, "acc", amount, "2024-02-01")
    }

    fn item() -> ItemId {
        ItemId::new("item-1").unwrap()
    }

    fn cred() -> ItemCredential {
        ItemCredential::new("access-sandbox-1")
    }

    fn engine(feed: ScriptedFeed) -> SyncEngine<ScriptedFeed> {
        SyncEngine::new(feed, SyncConfig::default())
    }

    fn ids(delta: &Delta) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        (
            delta.added.iter().map(|t| t.transaction_id.as_str()).collect(),
            delta.modified.iter().map(|t| t.transaction_id.as_str()).collect(),
            delta.removed.iter().map(|t| t.as_str()).collect(),
        )
    }

    #[tokio::test]
    async fn test_two_page_modify_overrides_add() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("A", 1.0), raw("B", 2.0)], vec![], vec![], true);
        let c2 = feed.push_page(vec![], vec![raw("B", 7.5)], vec![], false);
        let engine = engine(feed);

        let outcome = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        let delta = outcome.into_delta();
        assert_eq!(ids(&delta), (vec!["A"], vec!["B"], vec![]));
        assert_eq!(delta.modified[0].amount, 7.5);
        assert_eq!(delta.next_cursor, c2);
    }

    #[tokio::test]
    async fn test_remove_wins_across_pages() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![], vec![], vec!["T"], true);
        feed.push_page(vec![raw("T", 1.0)], vec![], vec![], false);
        let engine = engine(feed);

        let delta = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap()
            .into_delta();

        assert_eq!(ids(&delta), (vec![], vec![], vec!["T"]));
    }

    #[tokio::test]
    async fn test_resume_from_committed_cursor() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![raw("A", 1.0)], vec![], vec![], false);
        let c2 = feed.push_page(vec![raw("B", 1.0)], vec![], vec![], false);
        let engine = engine(feed);

        let delta = engine
            .sync(&item(), &cred(), c1.clone(), &CancellationToken::new())
            .await
            .unwrap()
            .into_delta();

        assert_eq!(ids(&delta).0, vec!["B"]);
        assert_eq!(delta.next_cursor, c2);
        assert_eq!(engine.feed().requests(), vec![c1]);
    }

    #[tokio::test]
    async fn test_up_to_date_cursor_yields_empty_delta() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![raw("A", 1.0)], vec![], vec![], false);
        let engine = engine(feed);

        let delta = engine
            .sync(&item(), &cred(), c1.clone(), &CancellationToken::new())
            .await
            .unwrap()
            .into_delta();

        assert!(delta.is_empty());
        assert_eq!(delta.next_cursor, c1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cursor_waits_and_refetches() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("A", 1.0)], vec![], vec![], true);
        let c2 = feed.push_page(vec![raw("B", 1.0)], vec![], vec![], false);
        feed.stall_at("c1", 2).unwrap();
        let engine = engine(feed);

        let start = Instant::now();
        let outcome = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.delta().next_cursor, c2);
        assert_eq!(ids(outcome.delta()).0, vec!["A", "B"]);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(engine.feed().requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_stall_returns_partial_delta() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![raw("A", 1.0)], vec![], vec![], true);
        feed.push_page(vec![raw("B", 1.0)], vec![], vec![], false);
        feed.stall_at("c1", 100).unwrap();
        let config = SyncConfig::default().with_max_stall_retries(3);
        let engine = SyncEngine::new(feed, config);

        let outcome = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            SyncOutcome::Stalled(stalled) => {
                assert_eq!(stalled.stalled_fetches, 4);
                assert_eq!(stalled.delta.next_cursor, c1);
                assert_eq!(ids(&stalled.delta).0, vec!["A"]);
            }
            other => panic!("expected stall, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stalled_page_contents_are_discarded() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("A", 1.0)], vec![], vec![], false);
        feed.stall_at("", 1).unwrap();
        let config = SyncConfig::default()
            .with_stall_delay(Duration::ZERO)
            .with_max_stall_retries(0);
        let engine = SyncEngine::new(feed, config);

        let outcome = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.is_complete());
        assert!(outcome.delta().is_empty());
        assert!(outcome.delta().next_cursor.is_beginning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_cursor_with_has_more_is_still_discarded() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("A", 1.0)], vec![], vec![], true);
        let c2 = feed.push_page(vec![raw("B", 1.0)], vec![], vec![], false);
        feed.stall_with_more_at("c1", 1).unwrap();
        let engine = engine(feed);

        let start = Instant::now();
        let outcome = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.delta().next_cursor, c2);
        assert_eq!(ids(outcome.delta()), (vec!["A", "B"], vec![], vec![]));
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(
            engine.feed().requests(),
            vec![SyncCursor::beginning(), SyncCursor::new("c1"), SyncCursor::new("c1")]
        );
    }

    #[tokio::test]
    async fn test_fetch_error_aborts_pass() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("A", 1.0)], vec![], vec![], true);
        feed.push_page(vec![raw("B", 1.0)], vec![], vec![], false);
        feed.fail_at("c1", 1).unwrap();
        let engine = engine(feed);

        let err = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::FeedFetchFailed { item, cursor, message } => {
                assert_eq!(item, "item-1");
                assert_eq!(cursor, "c1");
                assert!(message.contains("injected"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_record_fails_pass() {
        let feed = ScriptedFeed::new();
        feed.push_page(
            vec![RawTransaction::new("A", "acc", 1.0, "not-a-date")],
            vec![],
            vec![],
            false,
        );
        let engine = engine(feed);

        let result = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("A", 1.0)], vec![], vec![], false);
        let engine = engine(feed);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(engine.feed().requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_stall_wait() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![raw("A", 1.0)], vec![], vec![], false);
        feed.stall_at("", 10).unwrap();
        let engine = engine(feed);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let result = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(engine.feed().requests().len(), 2);
    }

    #[tokio::test]
    async fn test_removed_ids_keep_feed_order() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![], vec![], vec!["z", "y"], true);
        feed.push_page(vec![], vec![], vec!["x", "z"], false);
        let engine = engine(feed);

        let delta = engine
            .sync(&item(), &cred(), SyncCursor::beginning(), &CancellationToken::new())
            .await
            .unwrap()
            .into_delta();

        assert_eq!(
            delta.removed,
            vec![
                TransactionId::new("z"),
                TransactionId::new("y"),
                TransactionId::new("x")
            ]
        );
    }
}
