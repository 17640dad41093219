//! # Query Factories
//!
//! Funnel and engagement pipelines are declared as [`QueryDescriptor`]s. A
//! [`QueryFactory`] turns each descriptor into the executor that serves it, so the same
//! pipeline runs against PostgreSQL in production and against in-memory fixtures in
//! tests.

use crate::batch::aggregator::{AggregationOutcome, BatchAggregator};
use crate::batch::executor::{ChunkQuery, Identifier};
use crate::config::BatchConfig;
use crate::error::{QueryError, Result};
use crate::logging::log_batch_operation;
use crate::query::descriptor::QueryDescriptor;

/// Builds the executor for one descriptor
pub trait QueryFactory<I: Identifier>: Send + Sync {
    fn build(&self, descriptor: &QueryDescriptor) -> std::result::Result<Box<dyn ChunkQuery<I>>, QueryError>;
}

impl<I, F> QueryFactory<I> for F
where
    I: Identifier,
    F: Fn(&QueryDescriptor) -> std::result::Result<Box<dyn ChunkQuery<I>>, QueryError> + Send + Sync,
{
    fn build(&self, descriptor: &QueryDescriptor) -> std::result::Result<Box<dyn ChunkQuery<I>>, QueryError> {
        self(descriptor)
    }
}

/// Aggregate one descriptor over `cohort`.
///
/// The chunk size comes from [`BatchConfig::chunk_size_for`], the accumulation mode from
/// the descriptor's projection.
pub async fn run_descriptor<I, F>(
    factory: &F,
    batch: &BatchConfig,
    descriptor: &QueryDescriptor,
    cohort: &[I],
) -> Result<AggregationOutcome<I>>
where
    I: Identifier,
    F: QueryFactory<I> + ?Sized,
{
    descriptor.validate()?;
    let query = factory.build(descriptor)?;

    let outcome = BatchAggregator::from_config(batch)
        .with_chunk_size(batch.chunk_size_for(descriptor))
        .run(cohort, &*query, descriptor.accumulation_mode())
        .await?;

    log_batch_operation(
        "descriptor_aggregation",
        &descriptor.table_or_view,
        &outcome.stats,
        if outcome.stats.is_partial() {
            "partial"
        } else {
            "completed"
        },
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::accumulator::PartialResult;
    use crate::batch::executor::FnChunkQuery;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_factory(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(&QueryDescriptor) -> std::result::Result<Box<dyn ChunkQuery<u64>>, QueryError> + Send + Sync
    {
        move |_descriptor: &QueryDescriptor| {
            let calls = calls.clone();
            let query = FnChunkQuery::new(move |ids: Vec<u64>| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, QueryError>(PartialResult::Count(ids.len() as u64)) }
            });
            Ok(Box::new(query) as Box<dyn ChunkQuery<u64>>)
        }
    }

    #[tokio::test]
    async fn test_descriptor_chunk_size_override_is_honoured() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = counting_factory(calls.clone());
        let cohort: Vec<u64> = (0..100).collect();

        let descriptor = QueryDescriptor::count("user_onboarding", "user_id").with_chunk_size(10);
        let outcome = run_descriptor(&factory, &BatchConfig::default(), &descriptor, &cohort)
            .await
            .unwrap();

        assert_eq!(outcome.value(), 100);
        assert_eq!(outcome.stats.total_chunks, 10);
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_configured_continue_policy_returns_partial_outcome() {
        let factory = |_descriptor: &QueryDescriptor| {
            let query = FnChunkQuery::new(|ids: Vec<u64>| async move {
                if ids.contains(&0) {
                    Err(QueryError::backend("connection reset"))
                } else {
                    Ok(PartialResult::Count(ids.len() as u64))
                }
            });
            Ok::<_, QueryError>(Box::new(query) as Box<dyn ChunkQuery<u64>>)
        };
        let batch = BatchConfig {
            chunk_size: 25,
            failure_policy: crate::batch::FailurePolicy::Continue,
            ..BatchConfig::default()
        };
        let cohort: Vec<u64> = (0..100).collect();

        let outcome = run_descriptor(
            &factory,
            &batch,
            &QueryDescriptor::count("user_onboarding", "user_id"),
            &cohort,
        )
        .await
        .unwrap();

        assert_eq!(outcome.value(), 75);
        assert_eq!(outcome.stats.failed_chunks.len(), 1);
        assert_eq!(outcome.stats.failed_chunks[0].index, 0);
    }

    #[tokio::test]
    async fn test_invalid_descriptor_issues_no_queries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory = counting_factory(calls.clone());
        let cohort: Vec<u64> = (0..10).collect();

        let descriptor = QueryDescriptor::count("user onboarding", "user_id");
        let result = run_descriptor(&factory, &BatchConfig::default(), &descriptor, &cohort).await;

        assert!(matches!(
            result,
            Err(crate::error::AggregationError::Query(QueryError::InvalidDescriptor { .. }))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
