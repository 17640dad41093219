//! # Structured Logging Module
//!
//! Environment-aware structured logging. Development and test runs get human-readable
//! console output at `debug`; production gets JSON lines at `info`. `RUST_LOG` always
//! wins when set.

use crate::batch::aggregator::AggregationStats;
use crate::constants::{DEFAULT_ENVIRONMENT, ENVIRONMENT_ENV, FALLBACK_ENVIRONMENT_ENV};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber, and an
/// already-installed global subscriber (for example a host application's) is kept.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let console = if environment == "production" {
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
            return;
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(ENVIRONMENT_ENV)
        .or_else(|_| std::env::var(FALLBACK_ENVIRONMENT_ENV))
        .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string())
        .to_lowercase()
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for a completed batch
pub fn log_batch_operation(operation: &str, source: &str, stats: &AggregationStats, status: &str) {
    tracing::info!(
        operation = %operation,
        source = %source,
        identifiers = stats.identifiers,
        total_chunks = stats.total_chunks,
        completed_chunks = stats.completed_chunks,
        failed_chunks = stats.failed_chunks.len(),
        elapsed_ms = stats.elapsed.as_millis() as u64,
        average_chunk_ms = stats.average_chunk_duration().map(|d| d.as_millis() as u64),
        status = %status,
        "BATCH_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_by_environment() {
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        tracing::info!("still logging");
    }
}
