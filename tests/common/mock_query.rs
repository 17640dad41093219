//! Mock Chunk Query Implementation for Testing
//!
//! Provides an in-memory [`ChunkQuery`] that records every call so tests can assert
//! round-trip counts, chunk sizes and in-flight concurrency without a database.

use async_trait::async_trait;
use cohort_aggregator::batch::{Chunk, ChunkQuery, PartialResult};
use cohort_aggregator::QueryError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock query state for tracking calls
#[derive(Debug, Default, Clone)]
pub struct MockQueryState {
    /// Identifiers received by each call, in call order
    pub calls: Vec<Vec<u64>>,
    /// Chunk index of each call, in call order
    pub chunk_indices: Vec<usize>,
    /// Queries currently in flight
    pub in_flight: usize,
    /// Highest number of queries observed in flight at once
    pub max_in_flight: usize,
    /// Failures still to inject before calls start succeeding
    pub transient_failures_remaining: usize,
}

/// What the mock backend returns for a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockProjection {
    Count,
    Rows,
}

/// In-memory "table" containing the identifiers in `members`
#[derive(Debug, Clone)]
pub struct RecordingChunkQuery {
    name: String,
    members: Arc<HashSet<u64>>,
    projection: MockProjection,
    state: Arc<Mutex<MockQueryState>>,
    delay: Option<Duration>,
    fail_on_chunk: Option<usize>,
    permanent_failure: bool,
}

impl RecordingChunkQuery {
    /// Table containing every identifier for which `predicate` holds in `0..universe`
    pub fn matching(universe: u64, predicate: impl Fn(u64) -> bool) -> Self {
        Self::with_members((0..universe).filter(|id| predicate(*id)))
    }

    pub fn with_members(members: impl IntoIterator<Item = u64>) -> Self {
        Self {
            name: "recording_chunk_query".to_string(),
            members: Arc::new(members.into_iter().collect()),
            projection: MockProjection::Count,
            state: Arc::new(Mutex::new(MockQueryState::default())),
            delay: None,
            fail_on_chunk: None,
            permanent_failure: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Return matching identifiers instead of a count
    pub fn returning_rows(mut self) -> Self {
        self.projection = MockProjection::Rows;
        self
    }

    /// Simulate backend latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every query for the chunk at `index` (zero-based)
    pub fn failing_on_chunk(mut self, index: usize) -> Self {
        self.fail_on_chunk = Some(index);
        self
    }

    /// Fail the injected chunk with a non-retryable error
    pub fn with_permanent_failure(mut self) -> Self {
        self.permanent_failure = true;
        self
    }

    /// Time out the first `count` calls, then succeed
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.state.lock().unwrap().transient_failures_remaining = count;
        self
    }

    pub fn state(&self) -> MockQueryState {
        self.state.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(Vec::len)
            .collect()
    }

    /// Number of members among `ids`, as a single unbounded query would report
    pub fn expected_count(&self, ids: &[u64]) -> u64 {
        ids.iter().filter(|id| self.members.contains(*id)).count() as u64
    }

    /// Distinct members among `ids`
    pub fn expected_rows(&self, ids: &[u64]) -> HashSet<u64> {
        ids.iter()
            .copied()
            .filter(|id| self.members.contains(id))
            .collect()
    }
}

#[async_trait]
impl ChunkQuery<u64> for RecordingChunkQuery {
    async fn query_chunk(&self, chunk: &Chunk<'_, u64>) -> Result<PartialResult<u64>, QueryError> {
        let transient_failure = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(chunk.to_vec());
            state.chunk_indices.push(chunk.index);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            if state.transient_failures_remaining > 0 {
                state.transient_failures_remaining -= 1;
                true
            } else {
                false
            }
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.state.lock().unwrap().in_flight -= 1;

        if transient_failure {
            return Err(QueryError::Timeout {
                after: Duration::from_millis(100),
            });
        }

        if self.fail_on_chunk == Some(chunk.index) {
            return Err(if self.permanent_failure {
                QueryError::invalid_descriptor("simulated permanent failure")
            } else {
                QueryError::backend(format!("simulated failure on chunk {}", chunk.index))
            });
        }

        let matching: Vec<u64> = chunk
            .items
            .iter()
            .copied()
            .filter(|id| self.members.contains(id))
            .collect();

        Ok(match self.projection {
            MockProjection::Count => PartialResult::Count(matching.len() as u64),
            MockProjection::Rows => PartialResult::Rows(matching),
        })
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
