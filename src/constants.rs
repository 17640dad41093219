//! # System Constants
//!
//! Defaults and well-known names shared by configuration, logging and the batch engine.

/// Identifiers per chunk query when nothing else is configured
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// A stage within this fraction of its target percentage is "near target"
pub const DEFAULT_NEAR_TARGET_RATIO: f64 = 0.9;

/// Environment used when none is detected
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Stem of the configuration files (`<stem>.toml`, `<stem>.<env>.toml`)
pub const CONFIG_FILE_STEM: &str = "cohort-aggregator";

/// Prefix for `PREFIX__SECTION__KEY` configuration overrides
pub const ENV_PREFIX: &str = "COHORT_AGGREGATOR";

/// Environment variable names
pub const ENVIRONMENT_ENV: &str = "COHORT_AGGREGATOR_ENV";
pub const FALLBACK_ENVIRONMENT_ENV: &str = "APP_ENV";
pub const CONFIG_DIR_ENV: &str = "COHORT_AGGREGATOR_CONFIG_DIR";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
