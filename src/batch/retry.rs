//! # Caller-Side Retry
//!
//! The aggregator never retries a failed chunk. Callers that want retries wrap their
//! executor in [`RetryingChunkQuery`], which re-issues the same chunk with jittered
//! exponential backoff while the error is retryable. From the aggregator's point of
//! view the wrapped executor is still a single logical query per chunk.

use crate::batch::accumulator::PartialResult;
use crate::batch::executor::{ChunkQuery, Identifier};
use crate::batch::splitter::Chunk;
use crate::config::RetryConfig;
use crate::error::QueryError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Backoff schedule for re-issuing a failed chunk query
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Delay before retry number `attempt` (1-based), never above `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut seconds = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if self.jitter_factor > 0.0 {
            seconds *= 1.0 + fastrand::f64() * self.jitter_factor;
        }

        // Capped in f64 so an overflowing backoff never reaches Duration construction
        let capped = seconds.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

/// Executor decorator that retries retryable chunk failures
#[derive(Debug, Clone)]
pub struct RetryingChunkQuery<Q> {
    inner: Q,
    policy: RetryPolicy,
}

impl<Q> RetryingChunkQuery<Q> {
    pub fn new(inner: Q, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn into_inner(self) -> Q {
        self.inner
    }
}

#[async_trait]
impl<I, Q> ChunkQuery<I> for RetryingChunkQuery<Q>
where
    I: Identifier,
    Q: ChunkQuery<I>,
{
    async fn query_chunk(&self, chunk: &Chunk<'_, I>) -> Result<PartialResult<I>, QueryError> {
        let mut attempt = 1;
        loop {
            match self.inner.query_chunk(chunk).await {
                Ok(partial) => return Ok(partial),
                Err(error) if error.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        chunk = chunk.index + 1,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Chunk query failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn describe(&self) -> String {
        format!("retrying({})", self.inner.describe())
    }
}
