//! Upstream capability boundary for tallyfeed.
//!
//! This module defines the change-feed and report-workflow capabilities the
//! sync core consumes, the raw record shape the upstream publishes, and the
//! concrete clients that implement them.
//!
//! # Design Principles
//! - Capability, not implementation: the sync core only sees the traits
//! - Errors are opaque to the core except for the explicit not-ready signal
//! - Raw records keep unknown fields so nothing upstream sends is lost

pub mod client;
pub mod memory;
pub mod plaid;
pub mod raw;

pub use client::{
    Artifact, ArtifactKind, ArtifactRequest, ConsumerReportProduct, FeedClient, PageResult,
    ReportClient, ReportKind, ReportParams, ReportStatus, ReportToken, INCOME_INSIGHTS_ADD_ON,
};
pub use memory::{ScriptedFeed, ScriptedReports};
pub use plaid::{Environment, PlaidClient, PlaidConfig};
pub use raw::{RawLocation, RawPersonalFinanceCategory, RawTransaction};
