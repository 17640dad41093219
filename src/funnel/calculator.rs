//! # Funnel Stage Calculator
//!
//! Turns ordered stage counts into conversion percentages, drop-off rates and target
//! status. The first stage is the denominator for every percentage.
//!
//! The calculator is permissive about inconsistent data: a stage larger than its
//! predecessor reports a negative drop-off and a [`FunnelWarning`], never an error,
//! and counts are never adjusted.

use crate::config::FunnelConfig;
use crate::constants::DEFAULT_NEAR_TARGET_RATIO;
use crate::funnel::stage::{FunnelReport, FunnelStage, FunnelStageRecord, FunnelWarning, StageStatus};
use chrono::Utc;
use tracing::warn;

/// Compute a funnel report with the default near-target ratio
pub fn calculate_funnel(stages: &[FunnelStage]) -> FunnelReport {
    FunnelCalculator::default().calculate(stages)
}

/// Funnel calculator with a configurable near-target threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunnelCalculator {
    near_target_ratio: f64,
}

impl Default for FunnelCalculator {
    fn default() -> Self {
        Self {
            near_target_ratio: DEFAULT_NEAR_TARGET_RATIO,
        }
    }
}

impl FunnelCalculator {
    pub fn new(near_target_ratio: f64) -> Self {
        Self { near_target_ratio }
    }

    pub fn from_config(config: &FunnelConfig) -> Self {
        Self::new(config.near_target_ratio)
    }

    pub fn near_target_ratio(&self) -> f64 {
        self.near_target_ratio
    }

    pub fn calculate(&self, stages: &[FunnelStage]) -> FunnelReport {
        let denominator = stages.first().map(|stage| stage.count).unwrap_or(0);
        let mut records = Vec::with_capacity(stages.len());
        let mut warnings = Vec::new();

        for (ordinal, stage) in stages.iter().enumerate() {
            let previous = ordinal.checked_sub(1).map(|prev| stages[prev].count);

            if let Some(previous_count) = previous.filter(|previous| stage.count > *previous) {
                warn!(
                    stage = %stage.name,
                    ordinal,
                    count = stage.count,
                    previous_count,
                    "Funnel stage counts more users than its predecessor"
                );
                warnings.push(FunnelWarning::InconsistentStageOrdering {
                    stage: stage.name.clone(),
                    ordinal,
                    count: stage.count,
                    previous_count,
                });
            }

            let percentage = percentage_of(stage.count, denominator);
            let drop_off_percentage = match previous {
                Some(previous_count) if denominator > 0 => drop_off(previous_count, stage.count),
                _ => 0.0,
            };

            records.push(FunnelStageRecord {
                name: stage.name.clone(),
                ordinal,
                count: stage.count,
                percentage,
                drop_off_percentage,
                target_percentage: stage.target_percentage,
                status: StageStatus::classify(
                    percentage,
                    stage.target_percentage,
                    self.near_target_ratio,
                ),
            });
        }

        let overall_conversion = records.last().map(|last| last.percentage).unwrap_or(0.0);

        FunnelReport {
            stages: records,
            warnings,
            overall_conversion,
            calculated_at: Utc::now(),
        }
    }
}

/// `count / denominator * 100`, or 0 for a zero denominator
fn percentage_of(count: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    count as f64 / denominator as f64 * 100.0
}

/// `(previous - count) / previous * 100`, or 0 when the previous stage is empty
fn drop_off(previous: u64, count: u64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    (previous as f64 - count as f64) / previous as f64 * 100.0
}
