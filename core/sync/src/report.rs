//! Report job orchestration: create once, poll until ready, fetch artifacts.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tallyfeed_common::{Error, Result};
use tallyfeed_feed::{
    Artifact, ArtifactRequest, ConsumerReportProduct, ReportClient, ReportKind, ReportParams,
    ReportStatus, ReportToken, INCOME_INSIGHTS_ADD_ON,
};

use crate::retry::{poll_until_ready, Readiness, RetryPolicy};

/// Artifacts to fetch once a report is ready, in fetch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPlan {
    requests: Vec<ArtifactRequest>,
}

impl ArtifactPlan {
    pub fn new(requests: Vec<ArtifactRequest>) -> Self {
        Self { requests }
    }

    /// The structured body only.
    pub fn structured() -> Self {
        Self::new(vec![ArtifactRequest::structured()])
    }

    /// The structured body, then the rendered document with `add_ons`.
    pub fn structured_with_document<I, S>(add_ons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let document = add_ons
            .into_iter()
            .fold(ArtifactRequest::document(), |req, add_on| req.with_add_on(add_on));
        Self::new(vec![ArtifactRequest::structured(), document])
    }

    /// Default artifacts for a report kind.
    ///
    /// Every kind yields its structured body plus the rendered document,
    /// except partner insights, which has no document.
    pub fn for_kind(kind: ReportKind) -> Self {
        match kind {
            ReportKind::ConsumerReport(ConsumerReportProduct::PartnerInsights) => Self::structured(),
            ReportKind::ConsumerReport(ConsumerReportProduct::IncomeInsights) => {
                Self::structured_with_document([INCOME_INSIGHTS_ADD_ON])
            }
            ReportKind::Asset
            | ReportKind::ConsumerReport(ConsumerReportProduct::BaseReport)
            | ReportKind::Statements => Self::structured_with_document(Vec::<String>::new()),
        }
    }

    pub fn then(mut self, request: ArtifactRequest) -> Self {
        self.requests.push(request);
        self
    }

    pub fn requests(&self) -> &[ArtifactRequest] {
        &self.requests
    }
}

/// A submitted report job.
///
/// Status only changes through status checks, and artifacts are only
/// attached once the job is ready.
#[derive(Debug, Clone)]
pub struct ReportJob<T> {
    pub token: T,
    pub status: ReportStatus,
    pub artifacts: Vec<Artifact>,
}

impl<T> ReportJob<T> {
    fn submitted(token: T) -> Self {
        Self {
            token,
            status: ReportStatus::Pending,
            artifacts: Vec::new(),
        }
    }

    fn into_completed(self) -> CompletedReport<T> {
        CompletedReport {
            token: self.token,
            artifacts: self.artifacts,
        }
    }
}

/// A finished report job with its artifacts in plan order.
#[derive(Debug, Clone)]
pub struct CompletedReport<T> {
    pub token: T,
    pub artifacts: Vec<Artifact>,
}

/// Run one report job from closures.
///
/// `create` is called once and never retried. `check_status` is polled under
/// `policy` until the job is ready; a `Failed` status ends the job. Each
/// artifact in `plan` is then fetched exactly once, in order.
///
/// # Errors
/// - [`Error::CreationFailed`] if `create` fails
/// - [`Error::ReportFailed`] if the upstream reports the job as failed
/// - [`Error::RetriesExhausted`] if the job is still pending after every attempt
/// - [`Error::Cancelled`] if `cancel` fires
/// - Any error from `check_status` or `fetch_artifact`
pub async fn run_report_job<T, C, CF, S, SF, A, AF>(
    create: C,
    mut check_status: S,
    mut fetch_artifact: A,
    plan: &ArtifactPlan,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<CompletedReport<T>>
where
    T: Clone,
    C: FnOnce() -> CF,
    CF: Future<Output = Result<T>>,
    S: FnMut(T) -> SF,
    SF: Future<Output = Result<ReportStatus>>,
    A: FnMut(T, ArtifactRequest) -> AF,
    AF: Future<Output = Result<Artifact>>,
{
    policy.validate()?;
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let token = create().await.map_err(|e| {
        warn!("Report creation failed: {}", e);
        Error::CreationFailed(e.to_string())
    })?;
    let mut job = ReportJob::submitted(token);
    debug!("Report job submitted");

    let status_token = job.token.clone();
    poll_until_ready(
        |attempt| readiness(check_status(status_token.clone()), attempt),
        policy,
        cancel,
    )
    .await?;
    job.status = ReportStatus::Ready;

    for request in plan.requests() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let artifact = fetch_artifact(job.token.clone(), request.clone()).await?;
        job.artifacts.push(artifact);
    }

    info!("Report ready with {} artifacts", job.artifacts.len());
    Ok(job.into_completed())
}

/// Map one status check onto the poller's outcome. `Failed` is fatal.
async fn readiness<F>(status: F, attempt: u32) -> Result<Readiness<()>>
where
    F: Future<Output = Result<ReportStatus>>,
{
    match status.await? {
        ReportStatus::Pending => {
            debug!("Report pending on check {}", attempt);
            Ok(Readiness::NotReady)
        }
        ReportStatus::Ready => Ok(Readiness::Ready(())),
        ReportStatus::Failed(reason) => Err(Error::ReportFailed(reason)),
    }
}

/// Runs report jobs against a [`ReportClient`].
pub struct ReportOrchestrator<C: ReportClient + ?Sized> {
    client: Arc<C>,
    policy: RetryPolicy,
}

impl<C: ReportClient> ReportOrchestrator<C> {
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Self::from_arc(Arc::new(client), policy)
    }
}

impl<C: ReportClient + ?Sized> ReportOrchestrator<C> {
    pub fn from_arc(client: Arc<C>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Create a report from `params` and fetch the artifacts in `plan`.
    pub async fn run(
        &self,
        params: &ReportParams,
        plan: &ArtifactPlan,
        cancel: &CancellationToken,
    ) -> Result<CompletedReport<ReportToken>> {
        info!("Running {:?} report via {}", params.kind(), self.client.name());
        let client = &self.client;
        run_report_job(
            || async move { client.create(params).await },
            |token: ReportToken| async move { client.check_status(&token).await },
            |token: ReportToken, request: ArtifactRequest| async move {
                client.fetch_artifact(&token, &request).await
            },
            plan,
            &self.policy,
            cancel,
        )
        .await
    }
}
