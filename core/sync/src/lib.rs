//! tallyfeed sync core
//!
//! This module provides incremental synchronization of an item's change
//! feed and bounded polling of asynchronous upstream reports, including:
//! - Normalization of raw upstream records
//! - Merging of feed pages into one delta (remove wins, modify wins over add)
//! - A sync engine that tolerates an upstream still publishing its cursor
//! - A retry poller with a typed not-ready outcome and cancellation
//! - Report jobs: create once, poll until ready, fetch artifacts
//! - Per-item coordination of passes with atomic commits

pub mod config;
pub mod coordinator;
pub mod delta;
pub mod engine;
pub mod normalize;
pub mod report;
pub mod retry;

// Re-export main types
pub use config::{ReportConfig, SyncConfig, TallyfeedConfig};
pub use coordinator::SyncCoordinator;
pub use delta::DeltaBuilder;
pub use engine::{StalledSync, SyncEngine, SyncOutcome};
pub use normalize::normalize;
pub use report::{run_report_job, ArtifactPlan, CompletedReport, ReportJob, ReportOrchestrator};
pub use retry::{poll_until_ready, sleep_cancellable, Readiness, RetryPoller, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
