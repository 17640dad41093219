//! Error types for cohort-aggregator

use crate::batch::accumulator::AccumulationMode;
use crate::config::ConfigurationError;
use std::time::Duration;
use thiserror::Error;

/// Result type for batch aggregation operations
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Errors raised by a single chunk query against the backing store
#[derive(Error, Debug)]
pub enum QueryError {
    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The chunk query did not complete within its time budget
    #[error("Query timed out after {after:?}")]
    Timeout { after: Duration },

    /// Query descriptor could not be turned into SQL
    #[error("Invalid query descriptor: {message}")]
    InvalidDescriptor { message: String },

    /// Opaque backend failure raised by a caller-supplied query function
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl QueryError {
    /// Create an invalid descriptor error
    pub fn invalid_descriptor<S: Into<String>>(message: S) -> Self {
        Self::InvalidDescriptor {
            message: message.into(),
        }
    }

    /// Create a backend error from any displayable message
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend(anyhow::anyhow!(message.into()))
    }

    /// Whether repeating the same query could plausibly succeed.
    ///
    /// Connection-level and timeout failures are transient; malformed descriptors and
    /// row decoding problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Backend(_) => true,
            Self::InvalidDescriptor { .. } => false,
            Self::Database(error) => matches!(
                error,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
        }
    }
}

/// Errors that can occur while aggregating an identifier batch
#[derive(Error, Debug)]
pub enum AggregationError {
    /// One chunk's backend call failed; the remaining chunks were not merged
    #[error(
        "Chunk {} of {total_chunks} of {batch} failed ({} identifiers): {source}",
        .chunk_index + 1,
        .identifiers.len()
    )]
    ChunkQueryFailure {
        /// Label of the batch query, from [`ChunkQuery::describe`](crate::batch::ChunkQuery::describe)
        batch: String,
        chunk_index: usize,
        total_chunks: usize,
        identifiers: Vec<String>,
        #[source]
        source: QueryError,
    },

    /// Chunk size must be a positive integer
    #[error("Invalid chunk size {size}: must be at least 1")]
    InvalidChunkSize { size: usize },

    /// Concurrent policy needs at least one query in flight
    #[error("Invalid concurrency {max_in_flight}: must be at least 1")]
    InvalidConcurrency { max_in_flight: usize },

    /// A partial result that cannot be merged under the accumulator's mode
    #[error("Cannot merge {partial} partial result into {mode} accumulator")]
    ModeMismatch {
        mode: AccumulationMode,
        partial: &'static str,
    },

    /// The batch exceeded its deadline and its partial state was discarded
    #[error("Batch abandoned after {completed_chunks} of {total_chunks} chunks")]
    Abandoned {
        completed_chunks: usize,
        total_chunks: usize,
    },

    /// A stage query could not be prepared before any chunk was issued
    #[error("Query preparation failed: {0}")]
    Query(#[from] QueryError),

    /// Funnel definition is empty or has conflicting stages
    #[error("Invalid funnel '{funnel}': {message}")]
    InvalidFunnel { funnel: String, message: String },

    /// Connection pool could not be established
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid configuration
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl AggregationError {
    /// Create an invalid chunk size error
    pub fn invalid_chunk_size(size: usize) -> Self {
        Self::InvalidChunkSize { size }
    }

    /// Create an invalid concurrency error
    pub fn invalid_concurrency(max_in_flight: usize) -> Self {
        Self::InvalidConcurrency { max_in_flight }
    }

    /// Create an invalid funnel definition error
    pub fn invalid_funnel<F: Into<String>, M: Into<String>>(funnel: F, message: M) -> Self {
        Self::InvalidFunnel {
            funnel: funnel.into(),
            message: message.into(),
        }
    }

    /// Wrap a query error with the identity of the chunk it came from
    pub fn chunk_failure<B: Into<String>, I: ToString>(
        batch: B,
        chunk_index: usize,
        total_chunks: usize,
        identifiers: &[I],
        source: QueryError,
    ) -> Self {
        Self::ChunkQueryFailure {
            batch: batch.into(),
            chunk_index,
            total_chunks,
            identifiers: identifiers.iter().map(ToString::to_string).collect(),
            source,
        }
    }

    /// Index of the failing chunk, if this is a chunk failure
    pub fn failed_chunk_index(&self) -> Option<usize> {
        match self {
            Self::ChunkQueryFailure { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        }
    }

    /// Label of the batch whose chunk failed, if this is a chunk failure
    pub fn failed_batch(&self) -> Option<&str> {
        match self {
            Self::ChunkQueryFailure { batch, .. } => Some(batch),
            _ => None,
        }
    }

    /// Identifiers of the failing chunk, if this is a chunk failure
    pub fn failed_identifiers(&self) -> Option<&[String]> {
        match self {
            Self::ChunkQueryFailure { identifiers, .. } => Some(identifiers),
            _ => None,
        }
    }
}
