//! Configuration for sync passes and report jobs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use tallyfeed_common::{Error, Result};

use crate::retry::RetryPolicy;

/// Configuration for a sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Wait before refetching after a page with an empty cursor.
    pub stall_delay: Duration,
    /// Consecutive empty-cursor pages tolerated before giving up on the pass.
    pub max_stall_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stall_delay: Duration::from_secs(2),
            max_stall_retries: 5,
        }
    }
}

impl SyncConfig {
    pub fn with_stall_delay(mut self, delay: Duration) -> Self {
        self.stall_delay = delay;
        self
    }

    pub fn with_max_stall_retries(mut self, retries: u32) -> Self {
        self.max_stall_retries = retries;
        self
    }
}

/// Configuration for report jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Polling policy for the readiness checks.
    pub policy: RetryPolicy,
    /// History window requested when creating a report.
    pub days_requested: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            days_requested: 60,
        }
    }
}

impl ReportConfig {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_days_requested(mut self, days: u32) -> Self {
        self.days_requested = days;
        self
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyfeedConfig {
    pub sync: SyncConfig,
    pub report: ReportConfig,
}

impl TallyfeedConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.report.policy.validate()
    }
}
