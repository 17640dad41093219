//! # User Engagement Metrics
//!
//! Computed, never stored: engagement for a cohort is derived on demand by running the
//! configured descriptors through the bounded-batch aggregator.
//!
//! ## Human-Readable Explanation
//!
//! Answers "how many of these users actually did something?":
//!
//! ```text
//! Cohort: 1,200 users
//! Active: 312 users (26.0%)
//! Activity: 4,680 messages (15.0 per active user)
//! ```
//!
//! Active users are counted with a `Distinct` (or filter-column `CountDistinct`)
//! projection so a user with many rows is counted once. Activity volume is a plain
//! `Count` summed across chunks.

use crate::batch::accumulator::AccumulatedResult;
use crate::batch::executor::Identifier;
use crate::config::{AggregatorConfig, BatchConfig};
use crate::error::{QueryError, Result};
use crate::query::descriptor::QueryDescriptor;
use crate::query::factory::{run_descriptor, QueryFactory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, instrument};

/// Descriptors that define engagement for a cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementQuery {
    /// Counts or lists the users with any qualifying activity
    pub active_users: QueryDescriptor,
    /// Counts activity rows (messages, sessions, ...) for the cohort
    #[serde(default)]
    pub activity: Option<QueryDescriptor>,
}

impl EngagementQuery {
    pub fn new(active_users: QueryDescriptor) -> Self {
        Self {
            active_users,
            activity: None,
        }
    }

    pub fn with_activity(mut self, activity: QueryDescriptor) -> Self {
        self.activity = Some(activity);
        self
    }
}

/// Engagement snapshot for one cohort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    /// Distinct identifiers in the cohort
    pub total_users: u64,
    pub active_users: u64,
    /// `active_users / total_users * 100`, 0 for an empty cohort
    pub engagement_rate: f64,
    pub total_activity: Option<u64>,
    pub activity_per_active_user: Option<f64>,
    pub calculated_at: DateTime<Utc>,
}

impl EngagementMetrics {
    pub fn from_counts(total_users: u64, active_users: u64, total_activity: Option<u64>) -> Self {
        let engagement_rate = if total_users == 0 {
            0.0
        } else {
            active_users as f64 / total_users as f64 * 100.0
        };

        let activity_per_active_user = total_activity.map(|activity| {
            if active_users == 0 {
                0.0
            } else {
                activity as f64 / active_users as f64
            }
        });

        Self {
            total_users,
            active_users,
            engagement_rate,
            total_activity,
            activity_per_active_user,
            calculated_at: Utc::now(),
        }
    }

    pub fn inactive_users(&self) -> u64 {
        self.total_users.saturating_sub(self.active_users)
    }
}

/// Computes engagement metrics through a [`QueryFactory`]
#[derive(Debug, Clone)]
pub struct EngagementAnalyzer<F> {
    factory: F,
    batch: BatchConfig,
}

impl<F> EngagementAnalyzer<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            batch: BatchConfig::default(),
        }
    }

    pub fn from_config(factory: F, config: &AggregatorConfig) -> Self {
        Self {
            factory,
            batch: config.batch.clone(),
        }
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    #[instrument(skip_all, fields(cohort = cohort.len(), table = %query.active_users.table_or_view))]
    pub async fn compute<I>(&self, cohort: &[I], query: &EngagementQuery) -> Result<EngagementMetrics>
    where
        I: Identifier,
        F: QueryFactory<I>,
    {
        let total_users = cohort.iter().collect::<HashSet<_>>().len() as u64;

        let active_users = run_descriptor(&self.factory, &self.batch, &query.active_users, cohort)
            .await?
            .value();

        let total_activity = match &query.activity {
            Some(descriptor) => Some(
                run_descriptor(&self.factory, &self.batch, descriptor, cohort)
                    .await?
                    .value(),
            ),
            None => None,
        };

        let metrics = EngagementMetrics::from_counts(total_users, active_users, total_activity);
        info!(
            total_users,
            active_users,
            engagement_rate = metrics.engagement_rate,
            "Engagement metrics computed"
        );
        Ok(metrics)
    }

    /// Cohort members the `active_users` descriptor did not return, in cohort order.
    ///
    /// Needs a `Distinct` projection so the active identifiers themselves come back.
    pub async fn inactive_users<I>(&self, cohort: &[I], query: &EngagementQuery) -> Result<Vec<I>>
    where
        I: Identifier,
        F: QueryFactory<I>,
    {
        if !query.active_users.projection.returns_rows() {
            return Err(QueryError::invalid_descriptor(format!(
                "inactive users need a distinct projection on {}",
                query.active_users.table_or_view
            ))
            .into());
        }

        let outcome =
            run_descriptor(&self.factory, &self.batch, &query.active_users, cohort).await?;
        let active = match outcome.result {
            AccumulatedResult::Union(active) => active,
            AccumulatedResult::Sum(_) => HashSet::new(),
        };

        let mut seen = HashSet::new();
        Ok(cohort
            .iter()
            .filter(|id| !active.contains(*id) && seen.insert(*id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::accumulator::PartialResult;
    use crate::batch::executor::{ChunkQuery, FnChunkQuery};
    use crate::error::AggregationError;

    /// Users divisible by 4 are active and sent 3 messages each
    fn messages_factory(
        descriptor: &QueryDescriptor,
    ) -> std::result::Result<Box<dyn ChunkQuery<u64>>, QueryError> {
        let distinct = descriptor.projection.returns_rows();
        Ok(Box::new(FnChunkQuery::new(move |ids: Vec<u64>| async move {
            let active: Vec<u64> = ids.into_iter().filter(|id| id % 4 == 0).collect();
            Ok::<_, QueryError>(if distinct {
                PartialResult::Rows(active)
            } else {
                PartialResult::Count(active.len() as u64 * 3)
            })
        })))
    }

    fn engagement_query() -> EngagementQuery {
        EngagementQuery::new(QueryDescriptor::distinct(
            "conversation_messages",
            "user_id",
            "user_id",
        ))
        .with_activity(QueryDescriptor::count("conversation_messages", "user_id"))
    }

    #[tokio::test]
    async fn test_compute_engagement() {
        let cohort: Vec<u64> = (0..120).collect();
        let metrics = EngagementAnalyzer::new(messages_factory)
            .compute(&cohort, &engagement_query())
            .await
            .unwrap();

        assert_eq!(metrics.total_users, 120);
        assert_eq!(metrics.active_users, 30);
        assert!((metrics.engagement_rate - 25.0).abs() < 1e-9);
        assert_eq!(metrics.total_activity, Some(90));
        assert_eq!(metrics.activity_per_active_user, Some(3.0));
        assert_eq!(metrics.inactive_users(), 90);
    }

    #[tokio::test]
    async fn test_empty_cohort() {
        let metrics = EngagementAnalyzer::new(messages_factory)
            .compute::<u64>(&[], &engagement_query())
            .await
            .unwrap();

        assert_eq!(metrics.total_users, 0);
        assert_eq!(metrics.engagement_rate, 0.0);
        assert_eq!(metrics.activity_per_active_user, Some(0.0));
    }

    #[tokio::test]
    async fn test_inactive_users() {
        let cohort: Vec<u64> = vec![1, 4, 5, 8, 5];
        let inactive = EngagementAnalyzer::new(messages_factory)
            .inactive_users(&cohort, &engagement_query())
            .await
            .unwrap();
        assert_eq!(inactive, vec![1, 5]);

        let counted = EngagementQuery::new(QueryDescriptor::count("conversation_messages", "user_id"));
        let result = EngagementAnalyzer::new(messages_factory)
            .inactive_users(&cohort, &counted)
            .await;
        assert!(matches!(result, Err(AggregationError::Query(_))));
    }
}
