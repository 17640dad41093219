//! Shared fixtures for integration tests

#![allow(dead_code)]

pub mod mock_query;
pub mod strategies;

pub use mock_query::*;
pub use strategies::*;
