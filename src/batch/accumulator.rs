//! # Result Accumulator
//!
//! Merges per-chunk partial results into one aggregate for the whole batch.
//!
//! Two modes are supported:
//!
//! - **Sum**: partial counts are added together. Addition is commutative and
//!   associative, so completion order never changes the total.
//! - **Union**: partial row sets are inserted into a deduplicating set. The final
//!   cardinality counts every identifier once, however the rows were chunked.
//!
//! An accumulator belongs to exactly one batch invocation and is driven by a single
//! owner, so no locking is involved.

use crate::error::{AggregationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// How partial results are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationMode {
    /// Add partial counts
    #[default]
    Sum,
    /// Union partial row sets, deduplicating identifiers
    Union,
}

impl fmt::Display for AccumulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Union => write!(f, "union"),
        }
    }
}

/// The rows or scalar count returned by querying one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialResult<I> {
    Count(u64),
    Rows(Vec<I>),
}

impl<I> PartialResult<I> {
    /// Short label used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Count(_) => "count",
            Self::Rows(_) => "rows",
        }
    }

    /// Number of units this partial contributes before deduplication
    pub fn cardinality(&self) -> u64 {
        match self {
            Self::Count(count) => *count,
            Self::Rows(rows) => rows.len() as u64,
        }
    }
}

/// The merged result of all chunks of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulatedResult<I: Eq + Hash> {
    Sum(u64),
    Union(HashSet<I>),
}

impl<I: Eq + Hash> AccumulatedResult<I> {
    /// Zero-valued result for the given mode, as produced by an empty batch
    pub fn empty(mode: AccumulationMode) -> Self {
        match mode {
            AccumulationMode::Sum => Self::Sum(0),
            AccumulationMode::Union => Self::Union(HashSet::new()),
        }
    }

    /// Final count: the running sum, or the number of distinct identifiers
    pub fn value(&self) -> u64 {
        match self {
            Self::Sum(total) => *total,
            Self::Union(set) => set.len() as u64,
        }
    }

    pub fn mode(&self) -> AccumulationMode {
        match self {
            Self::Sum(_) => AccumulationMode::Sum,
            Self::Union(_) => AccumulationMode::Union,
        }
    }

    /// The distinct identifiers, when accumulated in union mode
    pub fn identifiers(&self) -> Option<&HashSet<I>> {
        match self {
            Self::Sum(_) => None,
            Self::Union(set) => Some(set),
        }
    }

    pub fn into_identifiers(self) -> Option<HashSet<I>> {
        match self {
            Self::Sum(_) => None,
            Self::Union(set) => Some(set),
        }
    }
}

/// Stateful merge target for one batch
#[derive(Debug)]
pub struct Accumulator<I: Eq + Hash> {
    state: AccumulatedResult<I>,
    merged: usize,
}

impl<I: Eq + Hash> Accumulator<I> {
    pub fn new(mode: AccumulationMode) -> Self {
        Self {
            state: AccumulatedResult::empty(mode),
            merged: 0,
        }
    }

    pub fn mode(&self) -> AccumulationMode {
        self.state.mode()
    }

    /// Number of partial results merged so far
    pub fn merged(&self) -> usize {
        self.merged
    }

    /// Current running value
    pub fn value(&self) -> u64 {
        self.state.value()
    }

    /// Merge one partial result.
    ///
    /// In sum mode a row set contributes its length. In union mode a bare count cannot
    /// be deduplicated and is rejected.
    pub fn merge(&mut self, partial: PartialResult<I>) -> Result<()> {
        match (&mut self.state, partial) {
            (AccumulatedResult::Sum(total), partial) => {
                *total = total.saturating_add(partial.cardinality());
            }
            (AccumulatedResult::Union(set), PartialResult::Rows(rows)) => {
                set.extend(rows);
            }
            (AccumulatedResult::Union(_), partial @ PartialResult::Count(_)) => {
                return Err(AggregationError::ModeMismatch {
                    mode: AccumulationMode::Union,
                    partial: partial.kind(),
                });
            }
        }
        self.merged += 1;
        Ok(())
    }

    pub fn finish(self) -> AccumulatedResult<I> {
        self.state
    }
}
