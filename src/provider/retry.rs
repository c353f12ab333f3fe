//! Retry/backoff wrapper around any [`GenerationClient`].
//!
//! Rate-limited and transient failures are retried with exponential backoff up to
//! `max_attempts`; fatal failures return immediately. Every attempt runs under its own
//! timeout and an elapsed attempt counts as transient.

use crate::error::GenerationError;
use crate::provider::{Generation, GenerationClient, GenerationRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Multiplier applied per further retry
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Upper bound on a single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Timeout of each individual attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_attempt_timeout_secs() -> u64 {
    120
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * factor^(retry-1)`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_factor.max(1.0).powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs.max(1))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Generation client that retries retryable failures of the wrapped client.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: GenerationClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: GenerationClient> GenerationClient for RetryingClient<C> {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GenerationError> {
        let attempts = self.policy.attempts();
        let timeout = self.policy.attempt_timeout();
        let mut last_error =
            GenerationError::Transient("no attempt was made".to_string());

        for attempt in 1..=attempts {
            let outcome = tokio::time::timeout(timeout, self.inner.generate(request.clone())).await;
            let error = match outcome {
                Ok(Ok(generation)) => {
                    if attempt > 1 {
                        debug!(purpose = %request.purpose, attempt, "Generation succeeded after retry");
                    }
                    return Ok(generation);
                }
                Ok(Err(error)) if !error.is_retryable() => return Err(error),
                Ok(Err(error)) => error,
                Err(_) => GenerationError::Transient(format!(
                    "Attempt timed out after {}s",
                    timeout.as_secs()
                )),
            };

            if attempt == attempts {
                last_error = error;
                break;
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                purpose = %request.purpose,
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable generation failure, backing off"
            );
            last_error = error;
            tokio::time::sleep(delay).await;
        }

        Err(last_error)
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }
}
