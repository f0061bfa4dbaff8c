//! Retry policy for store-level conflicts
//!
//! Uniqueness conflicts and stale revisions mean another worker committed
//! first. The unit of work is re-run from scratch so it re-resolves against
//! the now-visible winner. Every other error is returned immediately.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.retry_initial_interval_ms),
            max_interval: Duration::from_millis(config.retry_max_interval_ms),
            max_elapsed: Duration::from_millis(config.retry_max_elapsed_ms),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..ExponentialBackoff::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy gives up.
pub async fn with_conflict_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    backoff::future::retry(policy.backoff(), || {
        let attempt = op();
        async move {
            attempt.await.map_err(|err: AppError| {
                if err.is_retryable() {
                    debug!(error = %err, "Store conflict, retrying");
                    crate::metrics::record_conflict_retry();
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    })
    .await
}
