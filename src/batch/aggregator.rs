//! # Batch Aggregator
//!
//! Drives split → query → merge for one identifier batch.
//!
//! ## Execution policies
//!
//! - [`ExecutionPolicy::Sequential`]: one chunk query in flight at a time. A failure
//!   stops the loop before the next chunk is issued.
//! - [`ExecutionPolicy::Concurrent`]: up to `max_in_flight` chunk queries in flight,
//!   merged in completion order. The first failure drops the stream, which cancels
//!   every query still in flight.
//!
//! ## Failure policies
//!
//! - [`FailurePolicy::FailFast`] (default): the first failing chunk aborts the batch with
//!   [`AggregationError::ChunkQueryFailure`] and every merged partial is discarded.
//! - [`FailurePolicy::Continue`]: failing chunks are recorded in
//!   [`AggregationStats::failed_chunks`] and the batch carries on, returning the merge
//!   of the chunks that succeeded. Merge errors still abort.
//!
//! ## Ownership
//!
//! The accumulator lives inside the aggregation future. Dropping that future (caller
//! timeout, navigation away) abandons in-flight queries together with the partial
//! state, so a late partial result can never reach a result the caller still holds.

use crate::batch::accumulator::{AccumulatedResult, AccumulationMode, Accumulator, PartialResult};
use crate::batch::executor::{ChunkQuery, Identifier};
use crate::batch::splitter::{split, Chunk};
use crate::config::BatchConfig;
use crate::constants::DEFAULT_CHUNK_SIZE;
use crate::error::{AggregationError, Result};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// How chunk queries of one batch are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionPolicy {
    /// One chunk in flight at a time
    #[default]
    Sequential,
    /// Up to `max_in_flight` chunks in flight at a time
    Concurrent { max_in_flight: usize },
}

impl ExecutionPolicy {
    pub fn concurrent(max_in_flight: usize) -> Self {
        Self::Concurrent { max_in_flight }
    }

    /// Maximum number of chunk queries in flight
    pub fn max_in_flight(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Concurrent { max_in_flight } => *max_in_flight,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Concurrent { max_in_flight: 0 } => Err(AggregationError::invalid_concurrency(0)),
            _ => Ok(()),
        }
    }
}

/// What happens to the batch when a chunk query fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort on the first chunk failure
    #[default]
    FailFast,
    /// Record the failure and keep going with partial data
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

/// A chunk that failed under [`FailurePolicy::Continue`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedChunk {
    /// Zero-based chunk index
    pub index: usize,
    pub identifiers: Vec<String>,
    pub error: String,
}

/// Per-batch execution statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationStats {
    /// Number of identifiers in the batch
    pub identifiers: usize,
    /// Number of chunks the batch was split into
    pub total_chunks: usize,
    /// Number of chunk results merged
    pub completed_chunks: usize,
    /// Wall-clock time for the whole batch
    pub elapsed: Duration,
    /// Round-trip time of each chunk, indexed by chunk position
    pub chunk_durations: Vec<Duration>,
    /// Chunks skipped under [`FailurePolicy::Continue`], in completion order
    #[serde(default)]
    pub failed_chunks: Vec<FailedChunk>,
}

impl AggregationStats {
    fn new(identifiers: usize, total_chunks: usize) -> Self {
        Self {
            identifiers,
            total_chunks,
            completed_chunks: 0,
            elapsed: Duration::ZERO,
            chunk_durations: vec![Duration::ZERO; total_chunks],
            failed_chunks: Vec::new(),
        }
    }

    /// Whether some chunks failed and the result covers only part of the batch
    pub fn is_partial(&self) -> bool {
        !self.failed_chunks.is_empty()
    }

    /// Identifiers whose chunk failed, in failure order
    pub fn failed_identifiers(&self) -> impl Iterator<Item = &str> {
        self.failed_chunks
            .iter()
            .flat_map(|failed| failed.identifiers.iter().map(String::as_str))
    }

    /// Mean round-trip time across completed chunks
    pub fn average_chunk_duration(&self) -> Option<Duration> {
        if self.completed_chunks == 0 {
            return None;
        }
        let total: Duration = self.chunk_durations.iter().sum();
        Some(total / self.completed_chunks as u32)
    }

    /// Slowest chunk as `(index, duration)`
    pub fn slowest_chunk(&self) -> Option<(usize, Duration)> {
        self.chunk_durations
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, duration)| !duration.is_zero())
            .max_by_key(|(_, duration)| *duration)
    }
}

/// Result of one batch together with its execution statistics
#[derive(Debug, Clone)]
pub struct AggregationOutcome<I: Identifier> {
    pub result: AccumulatedResult<I>,
    pub stats: AggregationStats,
}

impl<I: Identifier> AggregationOutcome<I> {
    pub fn value(&self) -> u64 {
        self.result.value()
    }
}

/// Bounded-batch aggregation client
///
/// ```rust
/// use cohort_aggregator::batch::{AccumulationMode, BatchAggregator, ExecutionPolicy, FnChunkQuery, PartialResult};
/// use cohort_aggregator::QueryError;
///
/// # async fn example() -> cohort_aggregator::Result<()> {
/// let users: Vec<u64> = (1..=120).collect();
/// let completed_onboarding = FnChunkQuery::new(|ids: Vec<u64>| async move {
///     Ok::<_, QueryError>(PartialResult::Count(ids.iter().filter(|id| *id % 3 == 0).count() as u64))
/// });
///
/// let outcome = BatchAggregator::new(50)
///     .with_policy(ExecutionPolicy::concurrent(2))
///     .run(&users, &completed_onboarding, AccumulationMode::Sum)
///     .await?;
///
/// assert_eq!(outcome.value(), 40);
/// assert_eq!(outcome.stats.total_chunks, 3);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchAggregator {
    chunk_size: usize,
    policy: ExecutionPolicy,
    failure_policy: FailurePolicy,
    deadline: Option<Duration>,
}

impl Default for BatchAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl BatchAggregator {
    /// Sequential aggregator with the given chunk size and no deadline
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            policy: ExecutionPolicy::Sequential,
            failure_policy: FailurePolicy::FailFast,
            deadline: None,
        }
    }

    /// Build an aggregator from the `[batch]` configuration section
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            policy: config.policy(),
            failure_policy: config.failure_policy,
            deadline: config.deadline(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Abandon the batch if it has not finished within `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AggregationError::invalid_chunk_size(self.chunk_size));
        }
        self.policy.validate()
    }

    /// Aggregate `identifiers` through `query`, merging partials under `mode`.
    ///
    /// An empty batch returns a zero-valued result without issuing any query. Under
    /// [`FailurePolicy::FailFast`] the first failing chunk aborts the batch with
    /// [`AggregationError::ChunkQueryFailure`].
    #[instrument(
        skip_all,
        fields(
            identifiers = identifiers.len(),
            chunk_size = self.chunk_size,
            mode = %mode,
            on_failure = %self.failure_policy,
            query = %query.describe()
        )
    )]
    pub async fn run<I, Q>(
        &self,
        identifiers: &[I],
        query: &Q,
        mode: AccumulationMode,
    ) -> Result<AggregationOutcome<I>>
    where
        I: Identifier,
        Q: ChunkQuery<I> + ?Sized,
    {
        self.validate()?;

        let progress = AtomicUsize::new(0);
        let work = self.drive(identifiers, query, mode, &progress);

        let Some(deadline) = self.deadline else {
            return work.await;
        };

        match tokio::time::timeout(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let completed_chunks = progress.load(Ordering::Relaxed);
                let total_chunks = identifiers.len().div_ceil(self.chunk_size);
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    completed_chunks,
                    total_chunks,
                    "Batch deadline exceeded, discarding partial results"
                );
                Err(AggregationError::Abandoned {
                    completed_chunks,
                    total_chunks,
                })
            }
        }
    }

    async fn drive<I, Q>(
        &self,
        identifiers: &[I],
        query: &Q,
        mode: AccumulationMode,
        progress: &AtomicUsize,
    ) -> Result<AggregationOutcome<I>>
    where
        I: Identifier,
        Q: ChunkQuery<I> + ?Sized,
    {
        let started = Instant::now();
        let batch = query.describe();
        let chunks = split(identifiers, self.chunk_size)?;
        let mut stats = AggregationStats::new(identifiers.len(), chunks.len());
        let mut accumulator = Accumulator::new(mode);

        if stats.total_chunks == 0 {
            debug!("Empty identifier batch, no chunk queries issued");
            return Ok(AggregationOutcome {
                result: accumulator.finish(),
                stats,
            });
        }

        match self.policy {
            ExecutionPolicy::Sequential => {
                for chunk in chunks {
                    let completed = run_chunk(query, &batch, chunk).await;
                    self.settle(completed, &mut accumulator, &mut stats, progress)?;
                }
            }
            ExecutionPolicy::Concurrent { max_in_flight } => {
                let mut in_flight = stream::iter(chunks)
                    .map(|chunk| run_chunk(query, &batch, chunk))
                    .buffer_unordered(max_in_flight);

                while let Some(completed) = in_flight.next().await {
                    self.settle(completed, &mut accumulator, &mut stats, progress)?;
                }
            }
        }

        stats.completed_chunks = accumulator.merged();
        stats.elapsed = started.elapsed();

        let result = accumulator.finish();
        info!(
            total_chunks = stats.total_chunks,
            failed_chunks = stats.failed_chunks.len(),
            value = result.value(),
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Batch aggregation complete"
        );

        Ok(AggregationOutcome { result, stats })
    }

    /// Merge one finished chunk, or record its failure when the policy allows it
    fn settle<I: Identifier>(
        &self,
        completed: Result<(usize, PartialResult<I>, Duration)>,
        accumulator: &mut Accumulator<I>,
        stats: &mut AggregationStats,
        progress: &AtomicUsize,
    ) -> Result<()> {
        match completed {
            Ok((index, partial, elapsed)) => {
                accumulator.merge(partial)?;
                stats.chunk_durations[index] = elapsed;
                progress.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(AggregationError::ChunkQueryFailure {
                chunk_index,
                identifiers,
                source,
                ..
            }) if self.failure_policy == FailurePolicy::Continue => {
                warn!(
                    chunk = chunk_index + 1,
                    identifiers = identifiers.len(),
                    error = %source,
                    "Continuing batch without failed chunk"
                );
                stats.failed_chunks.push(FailedChunk {
                    index: chunk_index,
                    identifiers,
                    error: source.to_string(),
                });
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}

async fn run_chunk<I, Q>(
    query: &Q,
    batch: &str,
    chunk: Chunk<'_, I>,
) -> Result<(usize, PartialResult<I>, Duration)>
where
    I: Identifier,
    Q: ChunkQuery<I> + ?Sized,
{
    let started = Instant::now();
    debug!(
        chunk = chunk.index + 1,
        total_chunks = chunk.total,
        size = chunk.len(),
        "Issuing chunk query"
    );

    match query.query_chunk(&chunk).await {
        Ok(partial) => {
            let elapsed = started.elapsed();
            debug!(
                chunk = chunk.index + 1,
                partial = partial.kind(),
                cardinality = partial.cardinality(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Chunk query complete"
            );
            Ok((chunk.index, partial, elapsed))
        }
        Err(source) => {
            error!(
                chunk = chunk.index + 1,
                total_chunks = chunk.total,
                size = chunk.len(),
                error = %source,
                "Chunk query failed"
            );
            Err(AggregationError::chunk_failure(
                batch,
                chunk.index,
                chunk.total,
                chunk.items,
                source,
            ))
        }
    }
}

/// Aggregate `identifiers` in chunks of `chunk_size`, one chunk at a time.
///
/// Chunk size changes only the number of round trips, never the result.
pub async fn aggregate<I, Q>(
    identifiers: &[I],
    chunk_size: usize,
    query: &Q,
    mode: AccumulationMode,
) -> Result<AccumulatedResult<I>>
where
    I: Identifier,
    Q: ChunkQuery<I> + ?Sized,
{
    BatchAggregator::new(chunk_size)
        .run(identifiers, query, mode)
        .await
        .map(|outcome| outcome.result)
}
