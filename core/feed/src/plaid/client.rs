//! Plaid API client.

use bytes::Bytes;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use tallyfeed_common::{ApiError, Error, ItemCredential, Result, SyncCursor, TransactionId};

use crate::client::{ConsumerReportProduct, PageResult};
use crate::raw::RawTransaction;

use super::PlaidConfig;

/// Body of `/transactions/sync`.
#[derive(Debug, Serialize)]
struct TransactionsSyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct RemovedTransaction {
    transaction_id: String,
}

/// Response of `/transactions/sync`.
#[derive(Debug, Deserialize)]
struct TransactionsSyncResponse {
    #[serde(default)]
    added: Vec<RawTransaction>,
    #[serde(default)]
    modified: Vec<RawTransaction>,
    #[serde(default)]
    removed: Vec<RemovedTransaction>,
    #[serde(default)]
    next_cursor: String,
    #[serde(default)]
    has_more: bool,
}

impl From<TransactionsSyncResponse> for PageResult {
    fn from(resp: TransactionsSyncResponse) -> Self {
        PageResult {
            added: resp.added,
            modified: resp.modified,
            removed: resp
                .removed
                .into_iter()
                .map(|r| TransactionId::new(r.transaction_id))
                .collect(),
            next_cursor: SyncCursor::new(resp.next_cursor),
            has_more: resp.has_more,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssetReportCreateResponse {
    pub asset_report_token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportEnvelope {
    #[serde(default)]
    pub report: serde_json::Value,
}

/// Plaid API client.
pub struct PlaidClient {
    http: Client,
    base: Url,
    config: PlaidConfig,
}

impl PlaidClient {
    /// Create a new client.
    ///
    /// # Errors
    /// - Invalid base URL
    /// - HTTP client construction failure
    pub fn new(config: PlaidConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tallyfeed/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        let base = Url::parse(config.endpoint())
            .map_err(|e| Error::InvalidInput(format!("Invalid base URL: {}", e)))?;

        Ok(Self { http, base, config })
    }

    /// Client configuration.
    pub fn config(&self) -> &PlaidConfig {
        &self.config
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidInput(format!("Invalid endpoint {}: {}", path, e)))
    }

    /// Body fields every request carries.
    fn authenticated(&self, mut body: serde_json::Value) -> serde_json::Value {
        body["client_id"] = serde_json::Value::String(self.config.client_id.clone());
        body["secret"] = serde_json::Value::String(self.config.secret.clone());
        body
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response> {
        let url = self.url(path)?;
        debug!("POST {}", url.path());
        self.http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Request to {} failed: {}", path, e)))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let response = self.post(path, body).await?;
        handle_response(response).await
    }

    async fn post_bytes(&self, path: &str, body: &impl Serialize) -> Result<Bytes> {
        let response = self.post(path, body).await?;
        let status = response.status();
        if status.is_success() {
            response
                .bytes()
                .await
                .map_err(|e| Error::Network(format!("Failed to read document: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(error_from_body(status, &body))
        }
    }

    /// Fetch one page of `/transactions/sync`.
    pub async fn transactions_sync(
        &self,
        access_token: &ItemCredential,
        cursor: &SyncCursor,
    ) -> Result<PageResult> {
        let request = TransactionsSyncRequest {
            client_id: &self.config.client_id,
            secret: &self.config.secret,
            access_token: access_token.expose(),
            cursor: (!cursor.is_beginning()).then(|| cursor.as_str()),
            count: self.config.page_size,
        };

        let response: TransactionsSyncResponse =
            self.post_json("/transactions/sync", &request).await?;
        Ok(response.into())
    }

    /// Create an asset report and return its token.
    pub async fn create_asset_report(
        &self,
        access_tokens: &[ItemCredential],
        days_requested: u32,
    ) -> Result<String> {
        let tokens: Vec<&str> = access_tokens.iter().map(|t| t.expose()).collect();
        let body = self.authenticated(serde_json::json!({
            "access_tokens": tokens,
            "days_requested": days_requested,
        }));
        let response: AssetReportCreateResponse =
            self.post_json("/asset_report/create", &body).await?;
        Ok(response.asset_report_token)
    }

    /// Get the structured asset report.
    pub async fn get_asset_report(&self, asset_report_token: &str) -> Result<serde_json::Value> {
        let body = self.authenticated(serde_json::json!({
            "asset_report_token": asset_report_token,
        }));
        let envelope: ReportEnvelope = self.post_json("/asset_report/get", &body).await?;
        Ok(envelope.report)
    }

    /// Get the asset report as PDF.
    pub async fn get_asset_report_pdf(&self, asset_report_token: &str) -> Result<Bytes> {
        let body = self.authenticated(serde_json::json!({
            "asset_report_token": asset_report_token,
        }));
        self.post_bytes("/asset_report/pdf/get", &body).await
    }

    /// Request a new consumer check report for a user.
    pub async fn create_check_report(
        &self,
        user_token: &ItemCredential,
        days_requested: u32,
    ) -> Result<()> {
        let mut body = self.authenticated(serde_json::json!({
            "user_token": user_token.expose(),
            "days_requested": days_requested,
        }));
        if let Some(webhook) = &self.config.webhook {
            body["webhook"] = serde_json::Value::String(webhook.clone());
        }
        let _: serde_json::Value = self.post_json("/cra/check_report/create", &body).await?;
        Ok(())
    }

    /// Get a structured consumer report product.
    pub async fn get_check_report(
        &self,
        user_token: &str,
        product: ConsumerReportProduct,
    ) -> Result<serde_json::Value> {
        let path = match product {
            ConsumerReportProduct::BaseReport => "/cra/check_report/base_report/get",
            ConsumerReportProduct::IncomeInsights => "/cra/check_report/income_insights/get",
            ConsumerReportProduct::PartnerInsights => "/cra/check_report/partner_insights/get",
        };
        let body = self.authenticated(serde_json::json!({ "user_token": user_token }));
        let envelope: ReportEnvelope = self.post_json(path, &body).await?;
        Ok(envelope.report)
    }

    /// Get the consumer report PDF with optional add-ons.
    pub async fn get_check_report_pdf(&self, user_token: &str, add_ons: &[String]) -> Result<Bytes> {
        let mut body = self.authenticated(serde_json::json!({ "user_token": user_token }));
        if !add_ons.is_empty() {
            body["add_ons"] = serde_json::json!(add_ons);
        }
        self.post_bytes("/cra/check_report/pdf/get", &body).await
    }

    /// List the statements available for an item.
    ///
    /// Returns the whole response body (`accounts[].statements[]`).
    pub async fn list_statements(&self, access_token: &ItemCredential) -> Result<serde_json::Value> {
        let body = self.authenticated(serde_json::json!({
            "access_token": access_token.expose(),
        }));
        self.post_json("/statements/list", &body).await
    }

    /// Download one statement as PDF.
    pub async fn download_statement(
        &self,
        access_token: &ItemCredential,
        statement_id: &str,
    ) -> Result<Bytes> {
        let body = self.authenticated(serde_json::json!({
            "access_token": access_token.expose(),
            "statement_id": statement_id,
        }));
        self.post_bytes("/statements/download", &body).await
    }
}

/// Id of the first statement listed in a `/statements/list` body.
pub(crate) fn first_statement_id(list: &serde_json::Value) -> Option<&str> {
    list["accounts"]
        .as_array()?
        .iter()
        .filter_map(|account| account["statements"].as_array())
        .flatten()
        .find_map(|statement| statement["statement_id"].as_str())
}

/// Decode a JSON response, mapping upstream error bodies to [`Error::Upstream`].
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status, &body))
    }
}

/// Classify a non-success response body.
///
/// The not-ready code becomes [`Error::NotReady`]; other coded bodies stay
/// [`Error::Upstream`].
pub(crate) fn error_from_body(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ApiError>(body) {
        Ok(api) if api.is_not_ready() => Error::NotReady(api.error_message),
        Ok(api) if !api.error_code.is_empty() => Error::Upstream(api),
        _ if status == StatusCode::NOT_FOUND => Error::NotFound("Resource not found".to_string()),
        _ => Error::Network(format!("API error: {} - {}", status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plaid::Environment;

    #[test]
    fn test_sync_response_maps_to_page() {
        let body = r#"{
            "added": [{"transaction_id": "t1", "account_id": "a1", "amount": 4.5, "date": "2024-02-01"}],
            "modified": [],
            "removed": [{"transaction_id": "t0", "account_id": "a1"}],
            "next_cursor": "cursor-2",
            "has_more": true,
            "request_id": "req"
        }"#;
        let response: TransactionsSyncResponse = serde_json::from_str(body).unwrap();
        let page: PageResult = response.into();

        assert_eq!(page.added.len(), 1);
        assert_eq!(page.removed, vec![TransactionId::new("t0")]);
        assert_eq!(page.next_cursor.as_str(), "cursor-2");
        assert!(page.has_more);
    }

    #[test]
    fn test_sync_request_omits_beginning_cursor() {
        let request = TransactionsSyncRequest {
            client_id: "id",
            secret: "secret",
            access_token: "token",
            cursor: None,
            count: 100,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("cursor").is_none());
        assert_eq!(json["count"], 100);
    }

    #[test]
    fn test_error_body_classification() {
        let not_ready = r#"{"error_type":"ASSET_REPORT_ERROR","error_code":"PRODUCT_NOT_READY","error_message":"the requested product is not yet ready"}"#;
        let err = error_from_body(StatusCode::BAD_REQUEST, not_ready);
        assert!(matches!(err, Error::NotReady(ref message) if message.contains("not yet ready")));
        assert!(err.is_not_ready());

        let login = r#"{"error_type":"ITEM_ERROR","error_code":"ITEM_LOGIN_REQUIRED","error_message":"login required"}"#;
        let err = error_from_body(StatusCode::BAD_REQUEST, login);
        assert!(matches!(err, Error::Upstream(_)));
        assert!(!err.is_not_ready());

        let err = error_from_body(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_first_statement_id() {
        let list = serde_json::json!({
            "accounts": [
                {"account_id": "a0", "statements": []},
                {"account_id": "a1", "statements": [
                    {"statement_id": "s-1", "month": 5, "year": 2024},
                    {"statement_id": "s-2", "month": 6, "year": 2024}
                ]}
            ],
            "request_id": "req"
        });
        assert_eq!(first_statement_id(&list), Some("s-1"));
        assert_eq!(first_statement_id(&serde_json::json!({"accounts": []})), None);
        assert_eq!(first_statement_id(&serde_json::json!({})), None);
    }

    #[test]
    fn test_client_builds_endpoint_urls() {
        let config = PlaidConfig::new("id", "secret", Environment::Sandbox).unwrap();
        let client = PlaidClient::new(config).unwrap();
        let url = client.url("/transactions/sync").unwrap();
        assert_eq!(url.as_str(), "https://sandbox.plaid.com/transactions/sync");

        let body = client.authenticated(serde_json::json!({ "x": 1 }));
        assert_eq!(body["client_id"], "id");
        assert_eq!(body["x"], 1);
    }
}
