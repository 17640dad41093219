//! # Per-Chunk Query Executor
//!
//! The seam between the aggregation loop and the external data store. One call to
//! [`ChunkQuery::query_chunk`] is exactly one round trip for one chunk: no caching, no
//! memoization and no internal retry. Failures are returned as-is; the aggregator
//! attaches the chunk identity before propagating them.

use crate::batch::accumulator::PartialResult;
use crate::batch::splitter::Chunk;
use crate::error::QueryError;
use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

/// Opaque identifier that can be chunked, deduplicated and reported in errors.
pub trait Identifier: Clone + Eq + Hash + Display + Send + Sync + 'static {}

impl<T> Identifier for T where T: Clone + Eq + Hash + Display + Send + Sync + 'static {}

/// Issues one backend query for one chunk of identifiers.
#[async_trait]
pub trait ChunkQuery<I: Identifier>: Send + Sync {
    /// Rows or count satisfying the query, restricted to the chunk's identifiers
    async fn query_chunk(&self, chunk: &Chunk<'_, I>) -> Result<PartialResult<I>, QueryError>;

    /// Name used in logs
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

#[async_trait]
impl<I, Q> ChunkQuery<I> for &Q
where
    I: Identifier,
    Q: ChunkQuery<I> + ?Sized,
{
    async fn query_chunk(&self, chunk: &Chunk<'_, I>) -> Result<PartialResult<I>, QueryError> {
        (**self).query_chunk(chunk).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[async_trait]
impl<I, Q> ChunkQuery<I> for Arc<Q>
where
    I: Identifier,
    Q: ChunkQuery<I> + ?Sized,
{
    async fn query_chunk(&self, chunk: &Chunk<'_, I>) -> Result<PartialResult<I>, QueryError> {
        (**self).query_chunk(chunk).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[async_trait]
impl<I, Q> ChunkQuery<I> for Box<Q>
where
    I: Identifier,
    Q: ChunkQuery<I> + ?Sized,
{
    async fn query_chunk(&self, chunk: &Chunk<'_, I>) -> Result<PartialResult<I>, QueryError> {
        (**self).query_chunk(chunk).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Adapts an async closure taking the chunk's owned identifiers.
///
/// ```rust
/// use cohort_aggregator::batch::{FnChunkQuery, PartialResult};
/// use cohort_aggregator::QueryError;
///
/// let query = FnChunkQuery::new(|ids: Vec<u64>| async move {
///     let even = ids.iter().filter(|id| *id % 2 == 0).count() as u64;
///     Ok::<_, QueryError>(PartialResult::<u64>::Count(even))
/// });
/// # let _ = query;
/// ```
pub struct FnChunkQuery<F> {
    func: F,
    name: String,
}

impl<F> FnChunkQuery<F> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            name: "fn_chunk_query".to_string(),
        }
    }

    /// Attach a name that shows up in logs
    pub fn named<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> std::fmt::Debug for FnChunkQuery<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnChunkQuery")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<I, F, Fut> ChunkQuery<I> for FnChunkQuery<F>
where
    I: Identifier,
    F: Fn(Vec<I>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PartialResult<I>, QueryError>> + Send + 'static,
{
    async fn query_chunk(&self, chunk: &Chunk<'_, I>) -> Result<PartialResult<I>, QueryError> {
        (self.func)(chunk.to_vec()).await
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
