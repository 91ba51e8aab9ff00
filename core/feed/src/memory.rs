//! Scripted in-memory clients for testing and offline demos.
//!
//! [`ScriptedFeed`] serves a chain of pages keyed by cursor (`""` -> `c1` ->
//! `c2` ...) and can inject fetch failures and empty-cursor stalls at chosen
//! cursors. [`ScriptedReports`] plays a report job that stays pending for a
//! configurable number of status checks.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use tallyfeed_common::{ApiError, Error, ItemCredential, Result, SyncCursor, TransactionId};

use crate::client::{
    Artifact, ArtifactKind, ArtifactRequest, FeedClient, PageResult, ReportClient, ReportParams,
    ReportStatus, ReportToken,
};
use crate::raw::RawTransaction;

#[derive(Debug, Default)]
struct Script {
    /// Page served for each cursor.
    pages: HashMap<String, PageResult>,
    /// Cursor after the last scripted page.
    tail: String,
    /// Remaining empty-cursor responses per cursor.
    stalls: HashMap<String, u32>,
    /// Remaining empty-cursor responses that still claim `has_more` and carry
    /// a half-published record.
    open_stalls: HashMap<String, u32>,
    /// Remaining injected failures per cursor.
    failures: HashMap<String, u32>,
    /// Every cursor requested, in order.
    requests: Vec<SyncCursor>,
}

/// In-memory change feed driven by a page script.
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    script: Mutex<Script>,
}

impl ScriptedFeed {
    /// Create an empty feed. Until a page is pushed, fetching the beginning
    /// answers with an empty cursor, like an upstream still running its first pull.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Script>> {
        self.script
            .lock()
            .map_err(|_| Error::Storage("scripted feed lock poisoned".to_string()))
    }

    /// Append a page at the end of the chain and return the cursor it acknowledges.
    ///
    /// The page is served for the current tail cursor; its `next_cursor` becomes
    /// the new tail. A page with `has_more == false` ends a pass, so pages appended
    /// afterwards model data published between passes.
    pub fn push_page(
        &self,
        added: Vec<RawTransaction>,
        modified: Vec<RawTransaction>,
        removed: Vec<&str>,
        has_more: bool,
    ) -> SyncCursor {
        let mut script = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = format!("c{}", script.pages.len() + 1);
        let page = PageResult {
            added,
            modified,
            removed: removed.into_iter().map(TransactionId::from).collect(),
            next_cursor: SyncCursor::new(next.clone()),
            has_more,
        };
        let tail = std::mem::replace(&mut script.tail, next.clone());
        script.pages.insert(tail, page);
        SyncCursor::new(next)
    }

    /// Answer the next `times` fetches of `cursor` with an empty-cursor page.
    pub fn stall_at(&self, cursor: &str, times: u32) -> Result<()> {
        self.lock()?.stalls.insert(cursor.to_string(), times);
        Ok(())
    }

    /// Like [`stall_at`](Self::stall_at), but the empty-cursor page reports
    /// `has_more` and carries a partial record, as an upstream mid-publish does.
    pub fn stall_with_more_at(&self, cursor: &str, times: u32) -> Result<()> {
        self.lock()?.open_stalls.insert(cursor.to_string(), times);
        Ok(())
    }

    /// Fail the next `times` fetches of `cursor`.
    pub fn fail_at(&self, cursor: &str, times: u32) -> Result<()> {
        self.lock()?.failures.insert(cursor.to_string(), times);
        Ok(())
    }

    /// Cursors requested so far, in order.
    pub fn requests(&self) -> Vec<SyncCursor> {
        self.lock().map(|s| s.requests.clone()).unwrap_or_default()
    }

    /// Cursor after the last scripted page.
    pub fn tail(&self) -> SyncCursor {
        self.lock()
            .map(|s| SyncCursor::new(s.tail.clone()))
            .unwrap_or_default()
    }
}

fn take_one(counter: &mut HashMap<String, u32>, cursor: &str) -> bool {
    match counter.get_mut(cursor) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl FeedClient for ScriptedFeed {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_page(
        &self,
        _credential: &ItemCredential,
        cursor: &SyncCursor,
    ) -> Result<PageResult> {
        let mut script = self.lock()?;
        script.requests.push(cursor.clone());
        let key = cursor.as_str();

        if take_one(&mut script.failures, key) {
            debug!("Injected failure at cursor {}", cursor);
            return Err(Error::Network(format!("injected failure at {}", cursor)));
        }

        if take_one(&mut script.stalls, key) {
            debug!("Injected stall at cursor {}", cursor);
            return Ok(PageResult::default());
        }

        if take_one(&mut script.open_stalls, key) {
            debug!("Injected open stall at cursor {}", cursor);
            return Ok(PageResult {
                added: vec![RawTransaction::new("partial", "acc", 0.0, "2024-01-01")],
                has_more: true,
                ..PageResult::default()
            });
        }

        if let Some(page) = script.pages.get(key) {
            return Ok(page.clone());
        }

        if key == script.tail {
            // Nothing new since the last page.
            return Ok(PageResult {
                next_cursor: cursor.clone(),
                ..PageResult::default()
            });
        }

        Err(Error::Upstream(ApiError {
            error_type: "INVALID_INPUT".to_string(),
            error_code: "INVALID_CURSOR".to_string(),
            error_message: format!("unknown cursor {}", cursor),
            display_message: None,
            request_id: None,
        }))
    }
}

/// In-memory report workflow.
#[derive(Debug)]
pub struct ScriptedReports {
    pending_checks: u32,
    fail_creation: bool,
    failure: Option<String>,
    structured: serde_json::Value,
    document: Bytes,
    create_calls: AtomicU32,
    status_calls: AtomicU32,
    fetch_calls: AtomicU32,
}

impl ScriptedReports {
    /// A report that is pending for `pending_checks` status checks, then ready.
    pub fn new(pending_checks: u32) -> Self {
        Self {
            pending_checks,
            fail_creation: false,
            failure: None,
            structured: serde_json::json!({ "report": { "items": [] } }),
            document: Bytes::from_static(b"%PDF-1.4\n%scripted\n"),
            create_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
        }
    }

    /// Make job creation fail.
    pub fn with_failing_creation(mut self) -> Self {
        self.fail_creation = true;
        self
    }

    /// Report the job as failed once it stops being pending.
    pub fn with_generation_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// Set the structured artifact body.
    pub fn with_structured(mut self, body: serde_json::Value) -> Self {
        self.structured = body;
        self
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedReports {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl ReportClient for ScriptedReports {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create(&self, params: &ReportParams) -> Result<ReportToken> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_creation {
            return Err(Error::Network("scripted creation failure".to_string()));
        }
        Ok(ReportToken::new(params.kind(), Uuid::new_v4().to_string()))
    }

    async fn check_status(&self, _token: &ReportToken) -> Result<ReportStatus> {
        let call = self.status_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.pending_checks {
            return Ok(ReportStatus::Pending);
        }
        match &self.failure {
            Some(reason) => Ok(ReportStatus::Failed(reason.clone())),
            None => Ok(ReportStatus::Ready),
        }
    }

    async fn fetch_artifact(
        &self,
        _token: &ReportToken,
        request: &ArtifactRequest,
    ) -> Result<Artifact> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match request.kind {
            ArtifactKind::Structured => Ok(Artifact::Structured(self.structured.clone())),
            ArtifactKind::Document => Ok(Artifact::Document(self.document.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str) -> RawTransaction {
        RawTransaction::new(id, "acc", 1.0, "2024-01-01")
    }

    #[tokio::test]
    async fn test_pages_follow_cursor_chain() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![tx("a")], vec![], vec![], true);
        let c2 = feed.push_page(vec![], vec![], vec!["a"], false);
        let cred = ItemCredential::new("token");

        let first = feed.fetch_page(&cred, &SyncCursor::beginning()).await.unwrap();
        assert_eq!(first.next_cursor, c1);
        assert!(first.has_more);

        let second = feed.fetch_page(&cred, &c1).await.unwrap();
        assert_eq!(second.next_cursor, c2);
        assert_eq!(second.removed, vec![TransactionId::new("a")]);
    }

    #[tokio::test]
    async fn test_tail_cursor_returns_empty_page() {
        let feed = ScriptedFeed::new();
        let c1 = feed.push_page(vec![tx("a")], vec![], vec![], false);
        let page = feed
            .fetch_page(&ItemCredential::new("token"), &c1)
            .await
            .unwrap();
        assert!(page.added.is_empty());
        assert_eq!(page.next_cursor, c1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn test_unknown_cursor_is_upstream_error() {
        let feed = ScriptedFeed::new();
        let err = feed
            .fetch_page(&ItemCredential::new("token"), &SyncCursor::new("bogus"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream(ref api) if api.error_code == "INVALID_CURSOR"));
    }

    #[tokio::test]
    async fn test_injected_stall_then_failure() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![tx("a")], vec![], vec![], false);
        feed.stall_at("", 1).unwrap();
        let cred = ItemCredential::new("token");

        let stalled = feed.fetch_page(&cred, &SyncCursor::beginning()).await.unwrap();
        assert!(stalled.next_cursor.is_beginning());

        feed.fail_at("", 1).unwrap();
        assert!(feed.fetch_page(&cred, &SyncCursor::beginning()).await.is_err());
        assert!(feed.fetch_page(&cred, &SyncCursor::beginning()).await.is_ok());
        assert_eq!(feed.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_open_stall_claims_more_without_cursor() {
        let feed = ScriptedFeed::new();
        feed.push_page(vec![tx("a")], vec![], vec![], false);
        feed.stall_with_more_at("", 1).unwrap();
        let cred = ItemCredential::new("token");

        let stalled = feed.fetch_page(&cred, &SyncCursor::beginning()).await.unwrap();
        assert!(stalled.next_cursor.is_beginning());
        assert!(stalled.has_more);
        assert_eq!(stalled.added.len(), 1);

        let page = feed.fetch_page(&cred, &SyncCursor::beginning()).await.unwrap();
        assert_eq!(page.next_cursor.as_str(), "c1");
    }

    #[tokio::test]
    async fn test_scripted_reports_counts_calls() {
        let reports = ScriptedReports::new(1);
        let params = ReportParams::Asset {
            access_tokens: vec![ItemCredential::new("token")],
            days_requested: 10,
        };
        let token = reports.create(&params).await.unwrap();
        assert_eq!(reports.check_status(&token).await.unwrap(), ReportStatus::Pending);
        assert_eq!(reports.check_status(&token).await.unwrap(), ReportStatus::Ready);

        let artifact = reports
            .fetch_artifact(&token, &ArtifactRequest::document())
            .await
            .unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Document);
        assert_eq!(reports.create_calls(), 1);
        assert_eq!(reports.status_calls(), 2);
        assert_eq!(reports.fetch_calls(), 1);
    }
}
