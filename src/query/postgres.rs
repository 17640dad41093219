//! # PostgreSQL Chunk Executor
//!
//! Executes a [`QueryDescriptor`] once per chunk against a `sqlx` connection pool.
//! The chunk is bound as a Postgres array (`$1`), so the statement text is identical
//! for every chunk of a batch and only the bound values change.

use crate::batch::accumulator::PartialResult;
use crate::batch::executor::{ChunkQuery, Identifier};
use crate::batch::retry::{RetryPolicy, RetryingChunkQuery};
use crate::batch::splitter::Chunk;
use crate::config::{AggregatorConfig, DatabaseConfig};
use crate::error::{QueryError, Result as AggregationResult};
use crate::query::descriptor::{PredicateValue, Projection, QueryDescriptor};
use crate::query::factory::QueryFactory;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgHasArrayType, PgPoolOptions};
use sqlx::query::QueryScalar;
use sqlx::{Decode, Encode, PgPool, Postgres, Type};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Identifier types that can be bound as a Postgres array and decoded from rows.
///
/// Implemented for `uuid::Uuid`, `String`, `i64` and any other type sqlx maps to a
/// Postgres scalar with an array type.
pub trait PgIdentifier:
    Identifier
    + for<'q> Encode<'q, Postgres>
    + for<'r> Decode<'r, Postgres>
    + Type<Postgres>
    + PgHasArrayType
    + Unpin
{
}

impl<T> PgIdentifier for T where
    T: Identifier
        + for<'q> Encode<'q, Postgres>
        + for<'r> Decode<'r, Postgres>
        + Type<Postgres>
        + PgHasArrayType
        + Unpin
{
}

/// Build a connection pool from the `[database]` configuration section
pub async fn connect_pool(config: &DatabaseConfig) -> AggregationResult<PgPool> {
    let database_url = config.database_url()?;

    info!(
        max_connections = config.max_connections,
        acquire_timeout_seconds = config.acquire_timeout_seconds,
        "Connecting to analytics database"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&database_url)
        .await?;

    Ok(pool)
}

/// Runs one [`QueryDescriptor`] per chunk against PostgreSQL
#[derive(Debug, Clone)]
pub struct PgChunkQuery {
    pool: PgPool,
    descriptor: QueryDescriptor,
    sql: String,
    timeout: Option<Duration>,
}

impl PgChunkQuery {
    /// Validate the descriptor and render its statement once
    pub fn new(pool: PgPool, descriptor: QueryDescriptor) -> Result<Self, QueryError> {
        let sql = descriptor.to_sql()?;
        Ok(Self {
            pool,
            descriptor,
            sql,
            timeout: None,
        })
    }

    /// Fail a chunk with [`QueryError::Timeout`] when it takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute<I: PgIdentifier>(&self, ids: Vec<I>) -> Result<PartialResult<I>, QueryError> {
        match &self.descriptor.projection {
            Projection::Count | Projection::CountDistinct(_) => {
                let query = sqlx::query_scalar::<_, i64>(&self.sql).bind(ids);
                let count = self.bind_predicate(query).fetch_one(&self.pool).await?;
                Ok(PartialResult::Count(count.max(0) as u64))
            }
            Projection::Distinct(_) => {
                let query = sqlx::query_scalar::<_, I>(&self.sql).bind(ids);
                let rows = self.bind_predicate(query).fetch_all(&self.pool).await?;
                Ok(PartialResult::Rows(rows))
            }
        }
    }

    fn bind_predicate<'q, O>(
        &self,
        query: QueryScalar<'q, Postgres, O, PgArguments>,
    ) -> QueryScalar<'q, Postgres, O, PgArguments> {
        let Some(value) = self
            .descriptor
            .extra_predicate
            .as_ref()
            .and_then(|predicate| predicate.value.clone())
        else {
            return query;
        };

        match value {
            PredicateValue::Text(text) => query.bind(text),
            PredicateValue::Integer(integer) => query.bind(integer),
            PredicateValue::Float(float) => query.bind(float),
            PredicateValue::Boolean(boolean) => query.bind(boolean),
            PredicateValue::Timestamp(timestamp) => query.bind(timestamp),
        }
    }
}

#[async_trait]
impl<I: PgIdentifier> ChunkQuery<I> for PgChunkQuery {
    #[instrument(
        skip_all,
        fields(table = %self.descriptor.table_or_view, chunk = chunk.index + 1, size = chunk.len())
    )]
    async fn query_chunk(&self, chunk: &Chunk<'_, I>) -> Result<PartialResult<I>, QueryError> {
        debug!(sql = %self.sql, "Executing chunk query");

        let execution = self.execute(chunk.to_vec());
        match self.timeout {
            Some(after) => tokio::time::timeout(after, execution)
                .await
                .map_err(|_| QueryError::Timeout { after })?,
            None => execution.await,
        }
    }

    fn describe(&self) -> String {
        format!("postgres({})", self.descriptor.table_or_view)
    }
}

/// Builds a [`PgChunkQuery`] per descriptor over a shared pool, optionally wrapped in
/// a [`RetryingChunkQuery`]
#[derive(Debug, Clone)]
pub struct PgQueryFactory {
    pool: PgPool,
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
}

impl PgQueryFactory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            timeout: None,
            retry: None,
        }
    }

    /// Apply `database.query_timeout_ms` and, when `retry.enabled`, the retry schedule
    pub fn from_config(pool: PgPool, config: &AggregatorConfig) -> Self {
        Self {
            pool,
            timeout: config.database.query_timeout(),
            retry: config
                .retry
                .enabled
                .then(|| RetryPolicy::from_config(&config.retry)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl<I: PgIdentifier> QueryFactory<I> for PgQueryFactory {
    fn build(&self, descriptor: &QueryDescriptor) -> Result<Box<dyn ChunkQuery<I>>, QueryError> {
        let mut query = PgChunkQuery::new(self.pool.clone(), descriptor.clone())?;
        if let Some(timeout) = self.timeout {
            query = query.with_timeout(timeout);
        }

        let query: Box<dyn ChunkQuery<I>> = match &self.retry {
            Some(policy) => Box::new(RetryingChunkQuery::new(query, policy.clone())),
            None => Box::new(query),
        };
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::Predicate;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/cohort_aggregator_test")
            .unwrap()
    }

    #[tokio::test]
    async fn test_statement_rendered_once() {
        let query = PgChunkQuery::new(
            lazy_pool(),
            QueryDescriptor::count("user_onboarding", "user_id")
                .with_predicate(Predicate::eq("completed", true)),
        )
        .unwrap();

        assert_eq!(
            query.sql(),
            r#"SELECT COUNT(*) AS value FROM "user_onboarding" WHERE "user_id" = ANY($1) AND "completed" = $2"#
        );
        assert_eq!(
            ChunkQuery::<uuid::Uuid>::describe(&query),
            "postgres(user_onboarding)"
        );
    }

    #[tokio::test]
    async fn test_factory_applies_retry_from_config() {
        let mut config = AggregatorConfig::default();
        config.retry.enabled = true;
        config.database.query_timeout_ms = Some(2_000);

        let factory = PgQueryFactory::from_config(lazy_pool(), &config);
        let query: Box<dyn ChunkQuery<uuid::Uuid>> = factory
            .build(&QueryDescriptor::distinct("conversation_messages", "user_id", "user_id"))
            .unwrap();
        assert_eq!(query.describe(), "retrying(postgres(conversation_messages))");

        let plain: Box<dyn ChunkQuery<uuid::Uuid>> = PgQueryFactory::new(lazy_pool())
            .build(&QueryDescriptor::count("user_onboarding", "user_id"))
            .unwrap();
        assert_eq!(plain.describe(), "postgres(user_onboarding)");
    }

    #[tokio::test]
    async fn test_invalid_descriptor_rejected_up_front() {
        let result = PgChunkQuery::new(lazy_pool(), QueryDescriptor::count("bad table", "id"));
        assert!(matches!(result, Err(QueryError::InvalidDescriptor { .. })));
    }
}
