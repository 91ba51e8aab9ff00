//! Raw transaction records as published by the upstream change feed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Personal-finance category block of a raw record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPersonalFinanceCategory {
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub detailed: String,
    #[serde(default)]
    pub confidence_level: Option<String>,
}

/// Location block of a raw record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Fields not modeled above (address, coordinates, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One transaction exactly as the upstream sent it.
///
/// Dates are kept as strings here; parsing happens during normalization so a
/// malformed record is reported instead of silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub transaction_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub iso_currency_code: Option<String>,
    #[serde(default)]
    pub unofficial_currency_code: Option<String>,
    /// Posting date, `YYYY-MM-DD`.
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub authorized_date: Option<String>,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub category: Option<Vec<String>>,
    #[serde(default)]
    pub personal_finance_category: Option<RawPersonalFinanceCategory>,
    #[serde(default)]
    pub location: Option<RawLocation>,
    #[serde(default)]
    pub payment_channel: Option<String>,
    /// Every other field the upstream sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawTransaction {
    /// Minimal record, mostly useful for scripted feeds and tests.
    pub fn new(
        transaction_id: impl Into<String>,
        account_id: impl Into<String>,
        amount: f64,
        date: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            account_id: account_id.into(),
            amount,
            iso_currency_code: Some("USD".to_string()),
            date: date.into(),
            ..Self::default()
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Mark as pending or posted.
    pub fn with_pending(mut self, pending: bool) -> Self {
        self.pending = pending;
        self
    }

    /// Full JSON form, including fields this crate does not model.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
