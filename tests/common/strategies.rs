use proptest::prelude::*;

/// Strategy for identifier batches, duplicates allowed
pub fn identifier_batch_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..1_000, 0..400)
}

/// Strategy for chunk sizes, from degenerate to larger than most batches
pub fn chunk_size_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![Just(1usize), 2usize..64, 64usize..500]
}

/// Strategy for funnel stage counts in arbitrary (not necessarily decreasing) order
pub fn stage_counts_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..10_000, 1..8)
}
