//! # Cohort Insights
//!
//! Dashboard metrics computed on demand over a cohort.

pub mod engagement;

pub use engagement::{EngagementAnalyzer, EngagementMetrics, EngagementQuery};
