#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Cohort Aggregator
//!
//! Bounded-batch aggregation client for cohort analytics over PostgreSQL.
//!
//! ## Overview
//!
//! Dashboards ask questions about cohorts of users ("how many of these 4,000 users
//! finished onboarding?"). Sending every identifier in one request runs into backend
//! request-size limits, so this crate splits the cohort into bounded chunks, issues one
//! query per chunk, and merges the partial results into the exact answer a single
//! unbounded query would have produced.
//!
//! ## Architecture
//!
//! ```text
//! identifiers ──► splitter ──► chunk query (×N) ──► accumulator ──► result
//!                                                        │
//!                                 funnel calculator ◄────┘
//! ```
//!
//! ## Key Features
//!
//! - **Exact results**: chunk size changes the number of round trips, never the answer
//! - **Two merge modes**: summed counts, or set-union of returned identifiers
//! - **Fail-fast**: the first failing chunk aborts the batch with its identifiers attached
//! - **Bounded concurrency**: optional `buffer_unordered` fan-out with a hard in-flight cap
//! - **Funnels and engagement**: declarative pipelines on top of the aggregator
//!
//! ## Module Organization
//!
//! - [`batch`] - Splitter, chunk executor seam, accumulator and aggregator
//! - [`query`] - Query descriptors, the PostgreSQL executor and query factories
//! - [`funnel`] - Funnel stage calculator and pipelines
//! - [`insights`] - Engagement metrics
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use cohort_aggregator::{aggregate, AccumulationMode, FnChunkQuery, PartialResult, QueryError};
//!
//! # async fn example() -> cohort_aggregator::Result<()> {
//! let cohort: Vec<u64> = (1..=120).collect();
//! let onboarded = FnChunkQuery::new(|ids: Vec<u64>| async move {
//!     Ok::<_, QueryError>(PartialResult::Count(ids.iter().filter(|id| *id % 2 == 0).count() as u64))
//! });
//!
//! let result = aggregate(&cohort, 50, &onboarded, AccumulationMode::Sum).await?;
//! assert_eq!(result.value(), 60);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod batch;
pub mod config;
pub mod constants;
pub mod error;
pub mod funnel;
pub mod insights;
pub mod logging;
pub mod query;

pub use batch::{
    aggregate, AccumulatedResult, AccumulationMode, AggregationOutcome, AggregationStats,
    BatchAggregator, Chunk, ChunkQuery, ExecutionPolicy, FailedChunk, FailurePolicy, FnChunkQuery,
    Identifier, PartialResult, RetryPolicy, RetryingChunkQuery,
};
pub use config::{AggregatorConfig, ConfigLoader, ConfigurationError};
pub use error::{AggregationError, QueryError, Result};
pub use funnel::{
    calculate_funnel, FunnelDefinition, FunnelPipeline, FunnelReport, FunnelStage,
    FunnelStageRecord, FunnelWarning, StageStatus,
};
pub use insights::{EngagementAnalyzer, EngagementMetrics, EngagementQuery};
pub use logging::init_structured_logging;
pub use query::{PgChunkQuery, PgQueryFactory, QueryDescriptor, QueryFactory};
