//! # Conversion Funnels
//!
//! - [`stage`] - Stage inputs, computed records, warnings and the report
//! - [`calculator`] - Percentages, drop-off and target status from ordered stage counts
//! - [`pipeline`] - Declarative funnel definitions aggregated over a cohort

pub mod calculator;
pub mod pipeline;
pub mod stage;

pub use calculator::{calculate_funnel, FunnelCalculator};
pub use pipeline::{FunnelDefinition, FunnelPipeline, FunnelRun, FunnelStageDefinition};
pub use stage::{FunnelReport, FunnelStage, FunnelStageRecord, FunnelWarning, StageStatus};
