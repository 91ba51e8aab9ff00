//! HTTP client for the Plaid aggregation API.
//!
//! This module provides the production implementation of the feed and
//! report capabilities:
//! - `/transactions/sync` for the cursor-paginated change feed
//! - asset report create / get / pdf
//! - consumer check report create / base report / insights / pdf
//! - statements list / download

pub mod client;
pub mod provider;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

use tallyfeed_common::{Error, Result};

pub use client::PlaidClient;

/// Default number of transactions per sync page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
/// Upper bound accepted by `/transactions/sync`.
pub const MAX_PAGE_SIZE: u32 = 500;

/// Upstream environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.plaid.com",
            Environment::Production => "https://production.plaid.com",
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "sandbox" => Ok(Environment::Sandbox),
            "production" => Ok(Environment::Production),
            other => Err(Error::InvalidInput(format!(
                "Unknown environment '{}'. Use: sandbox or production",
                other
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => write!(f, "sandbox"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// API credentials and endpoint settings.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct PlaidConfig {
    pub client_id: String,
    pub secret: String,
    #[zeroize(skip)]
    pub environment: Environment,
    /// Overrides the environment's base URL (useful for proxies and tests).
    pub base_url: Option<String>,
    /// Transactions per sync page, clamped to `1..=MAX_PAGE_SIZE`.
    pub page_size: u32,
    /// Webhook to register on consumer report creation.
    pub webhook: Option<String>,
}

impl PlaidConfig {
    /// Create a configuration for the given credentials.
    ///
    /// # Errors
    /// - Returns error if client id or secret is empty
    pub fn new(
        client_id: impl Into<String>,
        secret: impl Into<String>,
        environment: Environment,
    ) -> Result<Self> {
        let client_id = client_id.into();
        let secret = secret.into();
        if client_id.is_empty() || secret.is_empty() {
            return Err(Error::InvalidInput(
                "client id and secret are required".to_string(),
            ));
        }
        Ok(Self {
            client_id,
            secret,
            environment,
            base_url: None,
            page_size: DEFAULT_PAGE_SIZE,
            webhook: None,
        })
    }

    /// Use a custom base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set transactions per page.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Set the webhook for consumer report creation.
    pub fn with_webhook(mut self, webhook: impl Into<String>) -> Self {
        self.webhook = Some(webhook.into());
        self
    }

    /// Effective base URL.
    pub fn endpoint(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
    }
}

impl fmt::Debug for PlaidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaidConfig")
            .field("client_id", &self.client_id)
            .field("secret", &"[REDACTED]")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("page_size", &self.page_size)
            .finish()
    }
}
