//! PostgreSQL executor tests
//!
//! These need a database: `DATABASE_URL=postgres://... cargo test -- --ignored`

use cohort_aggregator::batch::{AccumulationMode, BatchAggregator, ExecutionPolicy};
use cohort_aggregator::insights::{EngagementAnalyzer, EngagementQuery};
use cohort_aggregator::query::{Predicate, QueryDescriptor};
use cohort_aggregator::{AggregationError, PgChunkQuery, PgQueryFactory, QueryError};
use sqlx::PgPool;
use uuid::Uuid;

async fn seed(pool: &PgPool, users: usize) -> sqlx::Result<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(users);
    for index in 0..users {
        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO user_onboarding (user_id, completed) VALUES ($1, $2)")
            .bind(user_id)
            .bind(index % 2 == 0)
            .execute(pool)
            .await?;

        // Every third user has two messages
        if index % 3 == 0 {
            for body in ["hello", "again"] {
                sqlx::query("INSERT INTO conversation_messages (user_id, body) VALUES ($1, $2)")
                    .bind(user_id)
                    .bind(body)
                    .execute(pool)
                    .await?;
            }
        }
        ids.push(user_id);
    }
    Ok(ids)
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_count_with_predicate_across_chunks(pool: PgPool) -> sqlx::Result<()> {
    let cohort = seed(&pool, 120).await?;
    let query = PgChunkQuery::new(
        pool.clone(),
        QueryDescriptor::count("user_onboarding", "user_id")
            .with_predicate(Predicate::eq("completed", true)),
    )
    .unwrap();

    let outcome = BatchAggregator::new(50)
        .run(&cohort, &query, AccumulationMode::Sum)
        .await
        .unwrap();

    assert_eq!(outcome.value(), 60);
    assert_eq!(outcome.stats.total_chunks, 3);
    Ok(())
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_distinct_rows_are_unioned(pool: PgPool) -> sqlx::Result<()> {
    let cohort = seed(&pool, 90).await?;
    let query = PgChunkQuery::new(
        pool.clone(),
        QueryDescriptor::distinct("conversation_messages", "user_id", "user_id"),
    )
    .unwrap();

    let outcome = BatchAggregator::new(25)
        .with_policy(ExecutionPolicy::concurrent(3))
        .run(&cohort, &query, AccumulationMode::Union)
        .await
        .unwrap();

    assert_eq!(outcome.value(), 30);
    Ok(())
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_engagement_over_postgres(pool: PgPool) -> sqlx::Result<()> {
    let cohort = seed(&pool, 60).await?;
    let analyzer = EngagementAnalyzer::new(PgQueryFactory::new(pool.clone()));
    let query = EngagementQuery::new(QueryDescriptor::distinct(
        "conversation_messages",
        "user_id",
        "user_id",
    ))
    .with_activity(QueryDescriptor::count("conversation_messages", "user_id"));

    let metrics = analyzer.compute(&cohort, &query).await.unwrap();

    assert_eq!(metrics.total_users, 60);
    assert_eq!(metrics.active_users, 20);
    assert_eq!(metrics.total_activity, Some(40));
    Ok(())
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_missing_table_is_a_chunk_failure(pool: PgPool) -> sqlx::Result<()> {
    let cohort = vec![Uuid::new_v4()];
    let query = PgChunkQuery::new(pool.clone(), QueryDescriptor::count("missing_table", "user_id"))
        .unwrap();

    let error = BatchAggregator::new(50)
        .run(&cohort, &query, AccumulationMode::Sum)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        AggregationError::ChunkQueryFailure {
            source: QueryError::Database(_),
            ..
        }
    ));
    Ok(())
}
