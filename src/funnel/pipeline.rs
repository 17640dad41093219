//! # Funnel Pipelines
//!
//! A [`FunnelDefinition`] names an ordered list of stages, each backed by a
//! [`QueryDescriptor`]. [`FunnelPipeline::run`] aggregates every stage over the same
//! cohort through the bounded-batch aggregator and feeds the counts to the
//! [`FunnelCalculator`].
//!
//! Definitions are plain serde data, so a dashboard can keep them in TOML or JSON:
//!
//! ```toml
//! name = "onboarding"
//!
//! [[stages]]
//! name = "signed_up"
//! target_percentage = 100.0
//!
//! [[stages]]
//! name = "completed_onboarding"
//! target_percentage = 70.0
//! descriptor = { table_or_view = "user_onboarding", filter_column = "user_id", projection = { kind = "count" } }
//! ```

use crate::batch::aggregator::AggregationStats;
use crate::batch::executor::Identifier;
use crate::config::{AggregatorConfig, BatchConfig};
use crate::error::{AggregationError, Result};
use crate::funnel::calculator::FunnelCalculator;
use crate::funnel::stage::{FunnelReport, FunnelStage};
use crate::query::descriptor::QueryDescriptor;
use crate::query::factory::{run_descriptor, QueryFactory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// One funnel stage and the query that counts it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStageDefinition {
    pub name: String,
    pub target_percentage: f64,
    /// Query counting the stage; `None` counts the distinct cohort itself
    #[serde(default)]
    pub descriptor: Option<QueryDescriptor>,
}

impl FunnelStageDefinition {
    pub fn new<S: Into<String>>(name: S, descriptor: QueryDescriptor, target_percentage: f64) -> Self {
        Self {
            name: name.into(),
            target_percentage,
            descriptor: Some(descriptor),
        }
    }

    /// Stage whose count is the number of distinct identifiers in the cohort
    pub fn cohort<S: Into<String>>(name: S, target_percentage: f64) -> Self {
        Self {
            name: name.into(),
            target_percentage,
            descriptor: None,
        }
    }
}

/// Ordered funnel stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelDefinition {
    pub name: String,
    pub stages: Vec<FunnelStageDefinition>,
}

impl FunnelDefinition {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: FunnelStageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(AggregationError::invalid_funnel(&self.name, "no stages defined"));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(AggregationError::invalid_funnel(
                    &self.name,
                    format!("duplicate stage '{}'", stage.name),
                ));
            }
            if !(0.0..=100.0).contains(&stage.target_percentage) {
                return Err(AggregationError::invalid_funnel(
                    &self.name,
                    format!(
                        "stage '{}' target {} is outside 0-100",
                        stage.name, stage.target_percentage
                    ),
                ));
            }
            if let Some(descriptor) = &stage.descriptor {
                descriptor.validate()?;
            }
        }
        Ok(())
    }
}

/// Report plus the batch statistics of every stage query
#[derive(Debug, Clone, Serialize)]
pub struct FunnelRun {
    pub funnel: String,
    pub report: FunnelReport,
    /// `(stage name, stats)` for stages backed by a query
    pub stage_stats: Vec<(String, AggregationStats)>,
}

impl FunnelRun {
    /// Chunk round trips issued across all stages
    pub fn total_round_trips(&self) -> usize {
        self.stage_stats
            .iter()
            .map(|(_, stats)| stats.completed_chunks)
            .sum()
    }
}

/// Runs funnel definitions against a cohort
#[derive(Debug, Clone)]
pub struct FunnelPipeline<F> {
    factory: F,
    batch: BatchConfig,
    calculator: FunnelCalculator,
}

impl<F> FunnelPipeline<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            batch: BatchConfig::default(),
            calculator: FunnelCalculator::default(),
        }
    }

    pub fn from_config(factory: F, config: &AggregatorConfig) -> Self {
        Self {
            factory,
            batch: config.batch.clone(),
            calculator: FunnelCalculator::from_config(&config.funnel),
        }
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_calculator(mut self, calculator: FunnelCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Aggregate every stage over `cohort` and compute the funnel.
    ///
    /// Stages run one after another; the first failing stage aborts the run.
    #[instrument(skip_all, fields(funnel = %definition.name, cohort = cohort.len()))]
    pub async fn run<I>(&self, definition: &FunnelDefinition, cohort: &[I]) -> Result<FunnelRun>
    where
        I: Identifier,
        F: QueryFactory<I>,
    {
        definition.validate()?;

        let mut stages = Vec::with_capacity(definition.stages.len());
        let mut stage_stats = Vec::new();

        for stage in &definition.stages {
            let count = match &stage.descriptor {
                None => cohort.iter().collect::<HashSet<_>>().len() as u64,
                Some(descriptor) => {
                    let outcome =
                        run_descriptor(&self.factory, &self.batch, descriptor, cohort).await?;
                    let value = outcome.value();
                    stage_stats.push((stage.name.clone(), outcome.stats));
                    value
                }
            };

            debug!(stage = %stage.name, count, "Funnel stage counted");
            stages.push(FunnelStage::new(
                stage.name.clone(),
                count,
                stage.target_percentage,
            ));
        }

        let report = self.calculator.calculate(&stages);
        info!(
            stages = report.stages.len(),
            overall_conversion = report.overall_conversion,
            warnings = report.warnings.len(),
            "Funnel calculated"
        );

        Ok(FunnelRun {
            funnel: definition.name.clone(),
            report,
            stage_stats,
        })
    }
}
