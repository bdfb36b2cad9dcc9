//! Bounded retry with linear backoff plus jitter.
//!
//! Technical failures are retried. A confirmed challenge is returned on the
//! first occurrence: repeating the same automated behavior against an active
//! challenge only raises suspicion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagedoor_types::{duration_serde, Result, StagedoorError};

use crate::pacing::Pacer;

/// Retry limits and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first try; an operation runs at most `max_attempts + 1` times.
    pub max_attempts: usize,
    #[serde(with = "duration_serde")]
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to each backoff.
    #[serde(with = "duration_serde")]
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            max_jitter: Duration::from_millis(750),
        }
    }
}

impl RetryPolicy {
    /// `base_delay * attempt + jitter`, with `attempt` counted from 1.
    pub fn backoff(&self, attempt: usize, jitter: Duration) -> Duration {
        self.base_delay
            .saturating_mul(attempt.min(u32::MAX as usize) as u32)
            .saturating_add(jitter)
    }
}

/// A successful result and the number of failed tries before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub failures: usize,
}

/// Runs operations under a [`RetryPolicy`], drawing jitter from a [`Pacer`].
#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    pacer: Arc<dyn Pacer>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, pacer: Arc<dyn Pacer>) -> Self {
        Self { policy, pacer }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts.
    ///
    /// - A challenge is returned unchanged after a single try.
    /// - Other non-retryable errors are returned unchanged.
    /// - Technical errors are retried; once exhausted the last one is wrapped
    ///   in [`StagedoorError::RetryExhausted`].
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<Retried<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tries = self.policy.max_attempts + 1;
        let mut failures = 0;
        loop {
            match op().await {
                Ok(value) => {
                    if failures > 0 {
                        tracing::debug!(op = %label, failures, "Recovered after retries");
                    }
                    return Ok(Retried { value, failures });
                }
                Err(e) if e.is_challenge() => {
                    tracing::warn!(op = %label, error = %e, "Challenge detected, not retrying");
                    return Err(e);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    failures += 1;
                    if failures >= tries {
                        tracing::warn!(op = %label, attempts = failures, error = %e, "Retries exhausted");
                        return Err(StagedoorError::RetryExhausted {
                            label: label.to_string(),
                            attempts: failures,
                            last: Box::new(e),
                        });
                    }
                    let delay = self
                        .policy
                        .backoff(failures, self.pacer.jitter(self.policy.max_jitter));
                    tracing::warn!(
                        op = %label,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
