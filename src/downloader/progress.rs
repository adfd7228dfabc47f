//! Progress aggregation across chunk workers

use crate::downloader::planner::{ChunkPlan, ChunkRange};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress of one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkProgress {
    pub id: usize,
    pub start: u64,
    pub end: u64,
    pub bytes_written: u64,
    /// 0 to 100
    pub percentage: f64,
}

/// Immutable view of a download's progress
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// 0 to 100; stays 0 while the total size is unknown
    pub percentage: f64,
    pub bytes_downloaded: u64,
    /// 0 when unknown
    pub bytes_total: u64,
    pub speed_bps: f64,
    /// None while the speed or the total size is unknown
    pub eta_seconds: Option<u64>,
    pub chunks: Vec<ChunkProgress>,
}

#[derive(Debug)]
struct ChunkState {
    range: ChunkRange,
    expected: u64,
    bytes_written: u64,
}

#[derive(Debug)]
struct AggregatorState {
    total: u64,
    chunks: Vec<ChunkState>,
    /// Absolute count fed by `observe`
    observed: u64,
    sample_at: Instant,
    sample_bytes: u64,
    speed: f64,
    published: Arc<ProgressSnapshot>,
}

impl AggregatorState {
    fn downloaded(&self) -> u64 {
        let sum = self.chunks.iter().map(|c| c.bytes_written).sum::<u64>() + self.observed;
        if self.total > 0 {
            sum.min(self.total)
        } else {
            sum
        }
    }

    fn publish(&mut self, now: Instant, interval: Duration) {
        let downloaded = self.downloaded();

        let elapsed = now.saturating_duration_since(self.sample_at);
        if elapsed >= interval && !elapsed.is_zero() {
            let delta = downloaded.saturating_sub(self.sample_bytes);
            self.speed = delta as f64 / elapsed.as_secs_f64();
            self.sample_at = now;
            self.sample_bytes = downloaded;
        }

        let eta_seconds = if self.total == 0 {
            None
        } else if downloaded >= self.total {
            Some(0)
        } else if self.speed > 0.0 {
            Some(((self.total - downloaded) as f64 / self.speed).ceil() as u64)
        } else {
            None
        };

        let percentage = if self.total > 0 {
            downloaded as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };

        let chunks = self
            .chunks
            .iter()
            .map(|c| ChunkProgress {
                id: c.range.id,
                start: c.range.start,
                end: c.range.end,
                bytes_written: c.bytes_written,
                percentage: if c.expected > 0 {
                    c.bytes_written as f64 / c.expected as f64 * 100.0
                } else {
                    0.0
                },
            })
            .collect();

        self.published = Arc::new(ProgressSnapshot {
            percentage,
            bytes_downloaded: downloaded,
            bytes_total: self.total,
            speed_bps: self.speed,
            eta_seconds,
            chunks,
        });
    }
}

/// Merges byte counts from concurrent workers into published snapshots.
///
/// Every update runs under one lock: sum, speed sample, ETA, publish.
/// Readers only clone the `Arc` of the latest snapshot.
#[derive(Debug)]
pub struct ProgressAggregator {
    interval: Duration,
    state: Mutex<AggregatorState>,
}

impl ProgressAggregator {
    /// Track the chunks of an HTTP download plan
    pub fn new(plan: &ChunkPlan, interval: Duration) -> Self {
        Self::with_clock(plan, interval, Instant::now())
    }

    /// Track a single stream reported as absolute counts (media fetches)
    pub fn for_stream(total: u64, interval: Duration) -> Self {
        Self::build(total, Vec::new(), interval, Instant::now())
    }

    fn with_clock(plan: &ChunkPlan, interval: Duration, started: Instant) -> Self {
        let chunks = plan
            .ranges
            .iter()
            .map(|range| ChunkState {
                range: *range,
                expected: plan.expected_len(range),
                bytes_written: 0,
            })
            .collect();
        Self::build(plan.total_size, chunks, interval, started)
    }

    fn build(total: u64, chunks: Vec<ChunkState>, interval: Duration, started: Instant) -> Self {
        let mut state = AggregatorState {
            total,
            chunks,
            observed: 0,
            sample_at: started,
            sample_bytes: 0,
            speed: 0.0,
            published: Arc::new(ProgressSnapshot::default()),
        };
        state.publish(started, interval);
        Self {
            interval,
            state: Mutex::new(state),
        }
    }

    /// Add `bytes` written by the worker owning `chunk_id`
    pub fn record(&self, chunk_id: usize, bytes: u64) {
        self.record_at(chunk_id, bytes, Instant::now());
    }

    pub fn record_at(&self, chunk_id: usize, bytes: u64, now: Instant) {
        let mut state = self.state.lock();
        if let Some(chunk) = state.chunks.iter_mut().find(|c| c.range.id == chunk_id) {
            chunk.bytes_written = chunk.bytes_written.saturating_add(bytes);
            if chunk.expected > 0 {
                chunk.bytes_written = chunk.bytes_written.min(chunk.expected);
            }
        }
        state.publish(now, self.interval);
    }

    /// Replace the absolute downloaded count; a non-zero `total` updates the size
    pub fn observe(&self, downloaded: u64, total: u64) {
        self.observe_at(downloaded, total, Instant::now());
    }

    pub fn observe_at(&self, downloaded: u64, total: u64, now: Instant) {
        let mut state = self.state.lock();
        if total > 0 {
            state.total = total;
        }
        state.observed = downloaded;
        state.publish(now, self.interval);
    }

    /// Set the total size once it becomes known (single-stream GET headers)
    pub fn set_total(&self, total: u64) {
        let mut state = self.state.lock();
        state.total = total;
        if let [only] = state.chunks.as_mut_slice() {
            only.expected = total;
        }
        state.publish(Instant::now(), self.interval);
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> Arc<ProgressSnapshot> {
        Arc::clone(&self.state.lock().published)
    }

    /// Bytes written so far, clamped to the total
    pub fn total_written(&self) -> u64 {
        self.state.lock().downloaded()
    }
}
