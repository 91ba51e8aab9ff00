//! Mapping of raw upstream records into the canonical transaction model.

use chrono::NaiveDate;

use tallyfeed_common::{
    CanonicalTransaction, Error, Location, PersonalFinanceCategory, Result, TransactionId,
};
use tallyfeed_feed::RawTransaction;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(raw: &RawTransaction, field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| {
        Error::InvalidRecord(format!(
            "transaction {}: bad {} '{}': {}",
            raw.transaction_id, field, value, e
        ))
    })
}

/// Drop empty strings the upstream uses in place of null.
fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

/// Normalize one raw record.
///
/// # Errors
/// - [`Error::InvalidRecord`] if the id is empty or a date does not parse
pub fn normalize(raw: &RawTransaction) -> Result<CanonicalTransaction> {
    if raw.transaction_id.is_empty() {
        return Err(Error::InvalidRecord(
            "transaction without transaction_id".to_string(),
        ));
    }

    let posted_date = parse_date(raw, "date", &raw.date)?;
    let authorized_date = match non_empty(&raw.authorized_date) {
        Some(date) => Some(parse_date(raw, "authorized_date", &date)?),
        None => None,
    };

    let currency_code = non_empty(&raw.iso_currency_code)
        .or_else(|| non_empty(&raw.unofficial_currency_code))
        .unwrap_or_default();

    let personal_finance_category = raw
        .personal_finance_category
        .as_ref()
        .map(|pfc| PersonalFinanceCategory {
            primary: pfc.primary.clone(),
            detailed: pfc.detailed.clone(),
            confidence: non_empty(&pfc.confidence_level),
        });

    let location = raw
        .location
        .as_ref()
        .map(|loc| Location {
            city: non_empty(&loc.city),
            region: non_empty(&loc.region),
            country: non_empty(&loc.country),
        })
        .unwrap_or_default();

    Ok(CanonicalTransaction {
        transaction_id: TransactionId::new(raw.transaction_id.clone()),
        account_id: raw.account_id.clone(),
        amount: raw.amount,
        currency_code,
        posted_date,
        authorized_date,
        pending: raw.pending,
        name: raw.name.clone().unwrap_or_default(),
        merchant_name: non_empty(&raw.merchant_name),
        category: raw.category.clone().unwrap_or_default(),
        personal_finance_category,
        location,
        payment_channel: non_empty(&raw.payment_channel),
        raw_payload: raw.to_value(),
    })
}
