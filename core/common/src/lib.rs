//! Common utilities and types shared across tallyfeed crates.
//!
//! This module provides the identifiers, the canonical transaction model and
//! the delta type that flow between the feed, sync and storage layers, plus
//! the single error taxonomy they all report through.

pub mod delta;
pub mod error;
pub mod transaction;
pub mod types;

pub use delta::Delta;
pub use error::{ApiError, Error, Result};
pub use transaction::{CanonicalTransaction, Location, PersonalFinanceCategory};
pub use types::{ItemCredential, ItemId, SyncCursor, TransactionId};
