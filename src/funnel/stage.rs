//! # Funnel Stage Records
//!
//! Input stages, computed per-stage records and the report returned by the
//! [`calculator`](super::calculator).
//!
//! ## Real-World Example
//!
//! For an onboarding funnel over a 100-user cohort:
//! ```text
//! Stage                 Count   Conversion   Drop-off   Status
//! Signed up               100      100.0%        0.0%   meeting target
//! Completed profile        80       80.0%       20.0%   meeting target
//! First conversation       40       40.0%       50.0%   below target
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One stage of an ordered funnel, already populated with its absolute count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStage {
    pub name: String,
    pub count: u64,
    /// Target conversion relative to the first stage, in percent
    pub target_percentage: f64,
}

impl FunnelStage {
    pub fn new<S: Into<String>>(name: S, count: u64, target_percentage: f64) -> Self {
        Self {
            name: name.into(),
            count,
            target_percentage,
        }
    }
}

/// Target comparison for a stage's conversion percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    MeetingTarget,
    NearTarget,
    BelowTarget,
}

impl StageStatus {
    /// Classify `percentage` against `target`; within `near_target_ratio` of the target
    /// counts as near.
    pub fn classify(percentage: f64, target: f64, near_target_ratio: f64) -> Self {
        if percentage >= target {
            Self::MeetingTarget
        } else if percentage >= target * near_target_ratio {
            Self::NearTarget
        } else {
            Self::BelowTarget
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MeetingTarget => write!(f, "meeting target"),
            Self::NearTarget => write!(f, "near target"),
            Self::BelowTarget => write!(f, "below target"),
        }
    }
}

/// Computed view of one funnel stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStageRecord {
    pub name: String,
    /// Zero-based position in the funnel
    pub ordinal: usize,
    pub count: u64,
    /// Count relative to the first stage, in percent
    pub percentage: f64,
    /// Decrease relative to the previous stage, in percent. Negative when the stage is
    /// larger than its predecessor.
    pub drop_off_percentage: f64,
    pub target_percentage: f64,
    pub status: StageStatus,
}

impl FunnelStageRecord {
    /// Percentage points between the stage and its target; negative when short of it
    pub fn gap_to_target(&self) -> f64 {
        self.percentage - self.target_percentage
    }
}

/// Non-fatal data conditions found while computing a funnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunnelWarning {
    /// A stage counted more users than the stage before it
    InconsistentStageOrdering {
        stage: String,
        ordinal: usize,
        count: u64,
        previous_count: u64,
    },
}

impl fmt::Display for FunnelWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InconsistentStageOrdering {
                stage,
                ordinal,
                count,
                previous_count,
            } => write!(
                f,
                "stage '{stage}' (#{ordinal}) counts {count}, more than the previous stage's {previous_count}"
            ),
        }
    }
}

/// Computed funnel with its warnings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelReport {
    pub stages: Vec<FunnelStageRecord>,
    pub warnings: Vec<FunnelWarning>,
    /// Last stage's percentage of the first stage
    pub overall_conversion: f64,
    pub calculated_at: DateTime<Utc>,
}

impl FunnelReport {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, name: &str) -> Option<&FunnelStageRecord> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Stage with the largest drop-off from its predecessor
    pub fn biggest_drop_off(&self) -> Option<&FunnelStageRecord> {
        self.stages
            .iter()
            .skip(1)
            .max_by(|a, b| a.drop_off_percentage.total_cmp(&b.drop_off_percentage))
    }

    pub fn stages_below_target(&self) -> impl Iterator<Item = &FunnelStageRecord> {
        self.stages
            .iter()
            .filter(|stage| stage.status == StageStatus::BelowTarget)
    }

    /// False when any stage counted more users than its predecessor
    pub fn is_consistent(&self) -> bool {
        self.warnings.is_empty()
    }
}
