//! # Chunk Queries
//!
//! Query descriptors for the per-chunk backend request and the PostgreSQL executor
//! that runs them.
//!
//! - [`descriptor`] - `{table_or_view, filter_column, projection, extra_predicate}` and SQL rendering
//! - [`factory`] - descriptor → executor seam shared by the funnel and engagement pipelines
//! - [`postgres`] - `sqlx` executor binding each chunk as a Postgres array

pub mod descriptor;
pub mod factory;
pub mod postgres;

pub use descriptor::{quote_identifier, Operator, Predicate, PredicateValue, Projection, QueryDescriptor};
pub use factory::{run_descriptor, QueryFactory};
pub use postgres::{connect_pool, PgChunkQuery, PgIdentifier, PgQueryFactory};
