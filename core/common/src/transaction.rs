//! Canonical transaction model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::TransactionId;

/// Personal-finance classification assigned by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalFinanceCategory {
    /// Top-level category (e.g. `FOOD_AND_DRINK`).
    pub primary: String,
    /// Fine-grained category (e.g. `FOOD_AND_DRINK_COFFEE`).
    pub detailed: String,
    /// Upstream confidence level (e.g. `VERY_HIGH`), if provided.
    pub confidence: Option<String>,
}

/// Where a transaction took place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

/// Normalized transaction record.
///
/// Amounts follow the outflow-positive convention: money leaving the account
/// is positive, refunds and deposits are negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub transaction_id: TransactionId,
    pub account_id: String,
    pub amount: f64,
    pub currency_code: String,
    pub posted_date: NaiveDate,
    pub authorized_date: Option<NaiveDate>,
    pub pending: bool,
    pub name: String,
    pub merchant_name: Option<String>,
    /// Category path, most general first.
    pub category: Vec<String>,
    pub personal_finance_category: Option<PersonalFinanceCategory>,
    pub location: Location,
    pub payment_channel: Option<String>,
    /// The untouched upstream representation.
    pub raw_payload: serde_json::Value,
}

impl CanonicalTransaction {
    /// Whether money left the account.
    pub fn is_outflow(&self) -> bool {
        self.amount > 0.0
    }
}
