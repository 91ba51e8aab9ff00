//! Capability traits for the upstream change feed and report workflow.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use tallyfeed_common::{ItemCredential, Result, SyncCursor, TransactionId};

use crate::raw::RawTransaction;

/// One page of the change feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub added: Vec<RawTransaction>,
    pub modified: Vec<RawTransaction>,
    pub removed: Vec<TransactionId>,
    /// Cursor acknowledging this page. Empty while the upstream is still
    /// publishing the item's initial history.
    pub next_cursor: SyncCursor,
    /// Whether another page is immediately available after `next_cursor`.
    pub has_more: bool,
}

/// Change-feed capability.
///
/// Implementations must handle their own authentication and transport. The
/// sync core treats every error they return as fatal for the current pass.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Get the client name (e.g., "plaid", "scripted").
    fn name(&self) -> &str;

    /// Fetch the page that follows `cursor`.
    ///
    /// # Preconditions
    /// - `cursor` is empty or a cursor previously returned for this credential
    ///
    /// # Errors
    /// - Network/transport errors
    /// - Upstream API errors (invalid cursor, item login required, ...)
    async fn fetch_page(&self, credential: &ItemCredential, cursor: &SyncCursor)
        -> Result<PageResult>;
}

/// Document add-on selecting the income section of a consumer report PDF.
pub const INCOME_INSIGHTS_ADD_ON: &str = "cra_income_insights";

/// Consumer-report products that can be fetched once a check report exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerReportProduct {
    BaseReport,
    IncomeInsights,
    PartnerInsights,
}

/// Which upstream workflow a report token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Asset,
    ConsumerReport(ConsumerReportProduct),
    /// Bank statements extracted for an item.
    Statements,
}

/// Parameters for creating a report job.
#[derive(Debug, Clone)]
pub enum ReportParams {
    /// Asset report over one or more items.
    Asset {
        access_tokens: Vec<ItemCredential>,
        days_requested: u32,
    },
    /// Consumer check report for a user.
    ConsumerReport {
        user_token: ItemCredential,
        product: ConsumerReportProduct,
        days_requested: u32,
    },
    /// Statements of one item. There is no separate creation step upstream;
    /// the statement list answers not-ready until extraction finishes.
    Statements { access_token: ItemCredential },
}

impl ReportParams {
    /// Report kind these parameters create.
    pub fn kind(&self) -> ReportKind {
        match self {
            ReportParams::Asset { .. } => ReportKind::Asset,
            ReportParams::ConsumerReport { product, .. } => ReportKind::ConsumerReport(*product),
            ReportParams::Statements { .. } => ReportKind::Statements,
        }
    }
}

/// Opaque handle returned by report creation.
#[derive(Clone, PartialEq, Eq)]
pub struct ReportToken {
    kind: ReportKind,
    value: String,
}

impl ReportToken {
    pub fn new(kind: ReportKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// Expose the token for use in an upstream request.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for ReportToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReportToken({:?}, [REDACTED])", self.kind)
    }
}

/// Status of an asynchronous report job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    /// Still being generated.
    Pending,
    /// Artifacts can be fetched.
    Ready,
    /// Generation failed upstream.
    Failed(String),
}

/// Shape of an artifact to fetch from a ready report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// JSON report body.
    Structured,
    /// Rendered binary document (PDF).
    Document,
}

/// One artifact fetch, with optional add-on selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    pub kind: ArtifactKind,
    #[serde(default)]
    pub add_ons: Vec<String>,
}

impl ArtifactRequest {
    pub fn structured() -> Self {
        Self {
            kind: ArtifactKind::Structured,
            add_ons: Vec::new(),
        }
    }

    pub fn document() -> Self {
        Self {
            kind: ArtifactKind::Document,
            add_ons: Vec::new(),
        }
    }

    /// Add an add-on selector (e.g. [`INCOME_INSIGHTS_ADD_ON`], or a
    /// statement id for statement documents).
    pub fn with_add_on(mut self, add_on: impl Into<String>) -> Self {
        self.add_ons.push(add_on.into());
        self
    }
}

/// A fetched report artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Structured(serde_json::Value),
    Document(Bytes),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Structured(_) => ArtifactKind::Structured,
            Artifact::Document(_) => ArtifactKind::Document,
        }
    }
}

/// Asynchronous report workflow capability.
#[async_trait]
pub trait ReportClient: Send + Sync {
    /// Get the client name.
    fn name(&self) -> &str;

    /// Submit a report job.
    ///
    /// # Errors
    /// - Any failure; callers never retry creation
    async fn create(&self, params: &ReportParams) -> Result<ReportToken>;

    /// Check whether the job behind `token` has finished.
    ///
    /// Only the upstream's explicit not-ready signal maps to
    /// [`ReportStatus::Pending`]; everything else is `Ready`, `Failed`, or an error.
    async fn check_status(&self, token: &ReportToken) -> Result<ReportStatus>;

    /// Fetch one artifact of a ready report.
    async fn fetch_artifact(&self, token: &ReportToken, request: &ArtifactRequest)
        -> Result<Artifact>;
}
