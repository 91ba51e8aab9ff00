//! Bounded polling for resources that report "not ready yet".
//!
//! The poller only retries on [`Readiness::NotReady`]. Errors returned by the
//! operation are fatal and end polling on the attempt that produced them.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tallyfeed_common::{Error, Result};

/// Outcome of one poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<T> {
    /// The resource materialized.
    Ready(T),
    /// Still being generated upstream; worth asking again.
    NotReady,
}

/// How often and how long to poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Delay after the first not-ready result.
    pub delay: Duration,
    /// Growth factor applied per further attempt. `None` keeps the delay fixed.
    pub backoff_multiplier: Option<f64>,
    /// Cap for the grown delay.
    pub max_delay: Duration,
    /// Whether to add +/- 25% jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_multiplier: None,
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Check the policy can be executed.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidInput(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(multiplier) = self.backoff_multiplier {
            if !multiplier.is_finite() || multiplier < 1.0 {
                return Err(Error::InvalidInput(format!(
                    "backoff multiplier must be >= 1.0, got {}",
                    multiplier
                )));
            }
        }
        Ok(())
    }

    /// Delay to wait after the `retry`-th not-ready result (0-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let multiplier = match self.backoff_multiplier {
            Some(m) if m.is_finite() && m >= 1.0 => m,
            _ => 1.0,
        };
        let cap = self.max_delay.max(self.delay);
        let base = self.delay.as_secs_f64() * multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let capped = base.min(cap.as_secs_f64());

        let final_delay = if self.jitter {
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            capped * jitter_factor
        } else {
            capped
        };

        // Huge configured delays do not fit back into a Duration as f64.
        Duration::try_from_secs_f64(final_delay.max(0.0)).unwrap_or(cap)
    }
}

impl Default for RetryPolicy {
    /// One-second checks, twenty attempts.
    fn default() -> Self {
        Self::new(20, Duration::from_millis(1000))
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// # Errors
/// - [`Error::Cancelled`] if the token is (or becomes) cancelled
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = sleep(delay) => Ok(()),
    }
}

/// Invoke `operation` until it is ready, attempts run out, or `cancel` fires.
///
/// `operation` receives the 1-based attempt number. It is called at most
/// `policy.max_attempts` times in total.
///
/// # Errors
/// - Any error returned by `operation`, immediately
/// - [`Error::RetriesExhausted`] if every attempt was not ready
/// - [`Error::Cancelled`] if cancelled before or between attempts
/// - [`Error::InvalidInput`] for an invalid policy
pub async fn poll_until_ready<T, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Readiness<T>>>,
{
    policy.validate()?;

    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        attempt += 1;
        match operation(attempt).await? {
            Readiness::Ready(value) => {
                if attempt > 1 {
                    debug!("Resource ready after {} attempts", attempt);
                }
                return Ok(value);
            }
            Readiness::NotReady => {
                if attempt >= policy.max_attempts {
                    warn!("Resource still not ready after {} attempts", attempt);
                    return Err(Error::RetriesExhausted { attempts: attempt });
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    "Attempt {}/{} not ready. Retrying in {:?}...",
                    attempt, policy.max_attempts, delay
                );
                sleep_cancellable(delay, cancel).await?;
            }
        }
    }
}

/// Reusable poller bound to one policy.
#[derive(Debug, Clone, Default)]
pub struct RetryPoller {
    policy: RetryPolicy,
}

impl RetryPoller {
    /// Create a new poller.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Poll `operation` with this poller's policy.
    pub async fn poll<T, F, Fut>(&self, operation: F, cancel: &CancellationToken) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Readiness<T>>>,
    {
        poll_until_ready(operation, &self.policy, cancel).await
    }

    /// Get the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}
