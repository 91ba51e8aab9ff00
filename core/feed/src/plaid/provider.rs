//! Feed and report capabilities backed by [`PlaidClient`].

use async_trait::async_trait;
use tracing::{debug, info};

use tallyfeed_common::{Error, ItemCredential, Result, SyncCursor};

use crate::client::{
    Artifact, ArtifactKind, ArtifactRequest, FeedClient, PageResult, ReportClient, ReportKind,
    ReportParams, ReportStatus, ReportToken,
};

use super::client::first_statement_id;
use super::PlaidClient;

/// Upstream code reported when report generation failed for good.
const GENERATION_FAILED: &str = "ASSET_REPORT_GENERATION_FAILED";

#[async_trait]
impl FeedClient for PlaidClient {
    fn name(&self) -> &str {
        "plaid"
    }

    async fn fetch_page(
        &self,
        credential: &ItemCredential,
        cursor: &SyncCursor,
    ) -> Result<PageResult> {
        let page = self.transactions_sync(credential, cursor).await?;
        debug!(
            "Fetched page at {}: +{} ~{} -{} has_more={}",
            cursor,
            page.added.len(),
            page.modified.len(),
            page.removed.len(),
            page.has_more
        );
        Ok(page)
    }
}

#[async_trait]
impl ReportClient for PlaidClient {
    fn name(&self) -> &str {
        "plaid"
    }

    async fn create(&self, params: &ReportParams) -> Result<ReportToken> {
        match params {
            ReportParams::Asset {
                access_tokens,
                days_requested,
            } => {
                let token = self
                    .create_asset_report(access_tokens, *days_requested)
                    .await?;
                info!("Asset report requested for {} items", access_tokens.len());
                Ok(ReportToken::new(ReportKind::Asset, token))
            }
            ReportParams::ConsumerReport {
                user_token,
                product,
                days_requested,
            } => {
                self.create_check_report(user_token, *days_requested).await?;
                info!("Consumer report requested ({:?})", product);
                Ok(ReportToken::new(
                    ReportKind::ConsumerReport(*product),
                    user_token.expose(),
                ))
            }
            ReportParams::Statements { access_token } => {
                // Extraction starts when the item is linked; polling the list is the job.
                debug!("Statements requested");
                Ok(ReportToken::new(ReportKind::Statements, access_token.expose()))
            }
        }
    }

    async fn check_status(&self, token: &ReportToken) -> Result<ReportStatus> {
        let result = match token.kind() {
            ReportKind::Asset => self.get_asset_report(token.expose()).await,
            ReportKind::ConsumerReport(product) => {
                self.get_check_report(token.expose(), product).await
            }
            ReportKind::Statements => {
                self.list_statements(&ItemCredential::new(token.expose())).await
            }
        };
        status_from(result)
    }

    async fn fetch_artifact(
        &self,
        token: &ReportToken,
        request: &ArtifactRequest,
    ) -> Result<Artifact> {
        match (token.kind(), request.kind) {
            (ReportKind::Asset, ArtifactKind::Structured) => self
                .get_asset_report(token.expose())
                .await
                .map(Artifact::Structured),
            (ReportKind::Asset, ArtifactKind::Document) => self
                .get_asset_report_pdf(token.expose())
                .await
                .map(Artifact::Document),
            (ReportKind::ConsumerReport(product), ArtifactKind::Structured) => self
                .get_check_report(token.expose(), product)
                .await
                .map(Artifact::Structured),
            (ReportKind::ConsumerReport(_), ArtifactKind::Document) => self
                .get_check_report_pdf(token.expose(), &request.add_ons)
                .await
                .map(Artifact::Document),
            (ReportKind::Statements, ArtifactKind::Structured) => self
                .list_statements(&ItemCredential::new(token.expose()))
                .await
                .map(Artifact::Structured),
            (ReportKind::Statements, ArtifactKind::Document) => {
                let access_token = ItemCredential::new(token.expose());
                let statement_id = match request.add_ons.first() {
                    Some(id) => id.clone(),
                    None => {
                        let list = self.list_statements(&access_token).await?;
                        first_statement_id(&list)
                            .map(str::to_string)
                            .ok_or_else(|| Error::NotFound("No statements listed".to_string()))?
                    }
                };
                self.download_statement(&access_token, &statement_id)
                    .await
                    .map(Artifact::Document)
            }
        }
    }
}

/// Map a product fetch onto a job status.
fn status_from(result: Result<serde_json::Value>) -> Result<ReportStatus> {
    match result {
        Ok(_) => Ok(ReportStatus::Ready),
        Err(e) if e.is_not_ready() => Ok(ReportStatus::Pending),
        Err(Error::Upstream(api)) if api.error_code == GENERATION_FAILED => {
            Ok(ReportStatus::Failed(api.error_message))
        }
        Err(e) => Err(e),
    }
}
