//! # Aggregator Configuration
//!
//! Layered configuration for batch sizing, execution policy, database access, retry
//! behaviour and funnel thresholds.
//!
//! ## Sources (lowest to highest precedence)
//!
//! 1. Built-in defaults ([`AggregatorConfig::default`])
//! 2. `config/cohort-aggregator.toml`
//! 3. `config/cohort-aggregator.<environment>.toml`
//! 4. `COHORT_AGGREGATOR__<SECTION>__<KEY>` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cohort_aggregator::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! println!("chunk size: {}", config.batch.chunk_size);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::batch::aggregator::{ExecutionPolicy, FailurePolicy};
use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_ENVIRONMENT, DEFAULT_NEAR_TARGET_RATIO, DATABASE_URL_ENV,
};
use crate::query::descriptor::QueryDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Root configuration structure mirroring cohort-aggregator.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Deployment environment (development, test, production)
    pub environment: String,

    /// Chunking and execution policy
    pub batch: BatchConfig,

    /// Database connection and pooling configuration
    pub database: DatabaseConfig,

    /// Caller-side retry of failed chunk queries
    pub retry: RetryConfig,

    /// Funnel status thresholds
    pub funnel: FunnelConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            batch: BatchConfig::default(),
            database: DatabaseConfig::default(),
            retry: RetryConfig::default(),
            funnel: FunnelConfig::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        self.batch.validate()?;
        self.database.validate()?;
        self.retry.validate()?;
        self.funnel.validate()?;
        Ok(())
    }
}

/// Chunking and execution policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum identifiers per chunk query
    pub chunk_size: usize,

    /// Chunk queries in flight at once; 1 runs chunks sequentially
    pub max_in_flight: usize,

    /// Abandon a batch that takes longer than this many milliseconds
    pub deadline_ms: Option<u64>,

    /// `fail_fast` aborts on the first failing chunk, `continue` keeps partial data
    pub failure_policy: FailurePolicy,

    /// Per-table chunk size overrides, keyed by table or view name
    pub table_chunk_sizes: HashMap<String, usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_in_flight: 1,
            deadline_ms: None,
            failure_policy: FailurePolicy::FailFast,
            table_chunk_sizes: HashMap::new(),
        }
    }
}

impl BatchConfig {
    pub fn policy(&self) -> ExecutionPolicy {
        if self.max_in_flight <= 1 {
            ExecutionPolicy::Sequential
        } else {
            ExecutionPolicy::concurrent(self.max_in_flight)
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Chunk size for a descriptor: its own override, then the table override, then the default
    pub fn chunk_size_for(&self, descriptor: &QueryDescriptor) -> usize {
        descriptor
            .chunk_size
            .or_else(|| self.table_chunk_sizes.get(&descriptor.table_or_view).copied())
            .unwrap_or(self.chunk_size)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.chunk_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.chunk_size",
                self.chunk_size,
                "must be at least 1",
            ));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigurationError::invalid_value(
                "batch.max_in_flight",
                self.max_in_flight,
                "must be at least 1",
            ));
        }
        if self.deadline_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "batch.deadline_ms",
                0,
                "must be positive when set",
            ));
        }
        if let Some((table, size)) = self.table_chunk_sizes.iter().find(|(_, size)| **size == 0) {
            return Err(ConfigurationError::invalid_value(
                format!("batch.table_chunk_sizes.{table}"),
                size,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Database connection and pooling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL; falls back to `DATABASE_URL` when unset
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Per-chunk query timeout
    pub query_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_seconds: 30,
            query_timeout_ms: None,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the connection URL
    pub fn database_url(&self) -> ConfigResult<String> {
        if let Some(url) = self.url.as_ref().filter(|url| !url.is_empty()) {
            return Ok(url.clone());
        }
        std::env::var(DATABASE_URL_ENV).map_err(|_| {
            ConfigurationError::missing_required_field(
                "database.url",
                format!("database configuration (or {DATABASE_URL_ENV})"),
            )
        })
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.max_connections,
                "must be at least 1",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(ConfigurationError::invalid_value(
                "database.min_connections",
                self.min_connections,
                format!("exceeds max_connections ({})", self.max_connections),
            ));
        }
        Ok(())
    }
}

/// Retry settings for callers wrapping executors in a retry decorator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Total attempts per chunk, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                self.max_attempts,
                "must be at least 1",
            ));
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(ConfigurationError::invalid_value(
                "retry.backoff_multiplier",
                self.backoff_multiplier,
                "must be a finite number >= 1.0",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigurationError::invalid_value(
                "retry.jitter_factor",
                self.jitter_factor,
                "must be between 0.0 and 1.0",
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.base_delay_ms",
                self.base_delay_ms,
                format!("exceeds max_delay_ms ({})", self.max_delay_ms),
            ));
        }
        Ok(())
    }
}

/// Funnel status thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    /// Fraction of the target percentage that still counts as "near target"
    pub near_target_ratio: f64,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            near_target_ratio: DEFAULT_NEAR_TARGET_RATIO,
        }
    }
}

impl FunnelConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.near_target_ratio > 0.0 && self.near_target_ratio <= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "funnel.near_target_ratio",
                self.near_target_ratio,
                "must be in (0.0, 1.0]",
            ));
        }
        Ok(())
    }
}
