//! Transfer strategy and byte-range planning

use serde::Serialize;

/// A contiguous, inclusive byte interval handled by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRange {
    pub id: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// One GET stream for the whole body
    Single,
    /// Ranged GETs written into a preallocated file
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub mode: TransferMode,
    /// 0 when the server did not report a size
    pub total_size: u64,
    pub chunk_size: u64,
    pub ranges: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// Bytes the given chunk is expected to carry, or 0 when unknown.
    pub fn expected_len(&self, range: &ChunkRange) -> u64 {
        match self.mode {
            TransferMode::Single => self.total_size,
            TransferMode::Parallel => range.len(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.ranges.len()
    }
}

/// Splits a resource into worker ranges
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    min_chunk_size: u64,
    max_threads: usize,
}

impl ChunkPlanner {
    pub fn new(min_chunk_size: u64, max_threads: usize) -> Self {
        Self {
            min_chunk_size: min_chunk_size.max(1),
            max_threads: max_threads.max(1),
        }
    }

    /// Choose single-stream or parallel transfer and compute the ranges.
    ///
    /// Parallel ranges partition `[0, total_size)` exactly; the last range
    /// absorbs the division remainder.
    pub fn plan(&self, total_size: u64, supports_ranges: bool) -> ChunkPlan {
        if !supports_ranges || total_size < self.min_chunk_size {
            return ChunkPlan {
                mode: TransferMode::Single,
                total_size,
                chunk_size: total_size,
                ranges: vec![ChunkRange {
                    id: 0,
                    start: 0,
                    end: total_size.saturating_sub(1),
                }],
            };
        }

        let chunk_size = (total_size / self.max_threads as u64).max(self.min_chunk_size);
        let chunk_count = (total_size / chunk_size).min(self.max_threads as u64).max(1) as usize;

        let mut ranges = Vec::with_capacity(chunk_count);
        for i in 0..chunk_count {
            let start = i as u64 * chunk_size;
            let end = if i == chunk_count - 1 {
                total_size - 1
            } else {
                start + chunk_size - 1
            };
            ranges.push(ChunkRange { id: i, start, end });
        }

        ChunkPlan {
            mode: TransferMode::Parallel,
            total_size,
            chunk_size,
            ranges,
        }
    }
}
