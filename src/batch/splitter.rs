//! # Batch Splitter
//!
//! Partitions an identifier batch into contiguous, bounded-size chunks so that each
//! backend request stays under the store's request-size limits.
//!
//! Chunks borrow from the caller's slice; nothing is copied until a query needs an
//! owned list of identifiers.

use crate::error::{AggregationError, Result};
use std::iter::FusedIterator;

/// A contiguous sub-sequence of an identifier batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a, I> {
    /// Zero-based position of this chunk within its batch
    pub index: usize,
    /// Number of chunks the batch was split into
    pub total: usize,
    /// The identifiers covered by this chunk
    pub items: &'a [I],
}

impl<'a, I> Chunk<'a, I> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether this is the final chunk of its batch
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }

    /// Owned copy of the chunk's identifiers
    pub fn to_vec(&self) -> Vec<I>
    where
        I: Clone,
    {
        self.items.to_vec()
    }
}

/// Lazy iterator over the chunks of a batch.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a, I> {
    inner: std::slice::Chunks<'a, I>,
    next_index: usize,
    total: usize,
}

impl<'a, I> Iterator for ChunkIter<'a, I> {
    type Item = Chunk<'a, I>;

    fn next(&mut self) -> Option<Self::Item> {
        let items = self.inner.next()?;
        let chunk = Chunk {
            index: self.next_index,
            total: self.total,
            items,
        };
        self.next_index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<I> ExactSizeIterator for ChunkIter<'_, I> {}

impl<I> FusedIterator for ChunkIter<'_, I> {}

/// Number of chunks (round trips) a batch of `len` identifiers needs.
pub fn chunk_count(len: usize, max_chunk_size: usize) -> usize {
    if max_chunk_size == 0 {
        return 0;
    }
    len.div_ceil(max_chunk_size)
}

/// Split `items` into chunks of at most `max_chunk_size` identifiers.
///
/// An empty batch yields no chunks. A zero chunk size is rejected rather than
/// producing an endless or empty split.
pub fn split<I>(items: &[I], max_chunk_size: usize) -> Result<ChunkIter<'_, I>> {
    if max_chunk_size == 0 {
        return Err(AggregationError::invalid_chunk_size(max_chunk_size));
    }

    Ok(ChunkIter {
        inner: items.chunks(max_chunk_size),
        next_index: 0,
        total: chunk_count(items.len(), max_chunk_size),
    })
}
