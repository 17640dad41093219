//! # Bounded-Batch Aggregation
//!
//! Turns an arbitrarily large identifier batch into bounded-size backend queries and
//! merges the partial results.
//!
//! ## Components
//!
//! - [`splitter`] - Partitions a batch into ordered chunks of at most `chunk_size`
//! - [`executor`] - The [`ChunkQuery`] seam: one round trip per chunk
//! - [`accumulator`] - Sum and set-union merging of partial results
//! - [`aggregator`] - The split → query → merge loop and its execution policies
//! - [`retry`] - Opt-in retry decorator for callers that want one
//!
//! ## Invariants
//!
//! - Concatenating the chunks of a batch reproduces the batch exactly once, in order.
//! - Chunk size changes the number of round trips, never the result.
//! - An empty batch issues no queries and yields a zero-valued result.
//! - The first failing chunk aborts the batch (fail-fast).

pub mod accumulator;
pub mod aggregator;
pub mod executor;
pub mod retry;
pub mod splitter;

pub use accumulator::{AccumulatedResult, AccumulationMode, Accumulator, PartialResult};
pub use aggregator::{
    aggregate, AggregationOutcome, AggregationStats, BatchAggregator, ExecutionPolicy,
    FailedChunk, FailurePolicy,
};
pub use executor::{ChunkQuery, FnChunkQuery, Identifier};
pub use retry::{RetryPolicy, RetryingChunkQuery};
pub use splitter::{chunk_count, split, Chunk, ChunkIter};
