//! Download engine module

pub mod cancel;
pub mod engine;
pub mod filename;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod worker;

// Re-export for convenience
pub use cancel::CancelFlag;
pub use engine::{AttemptOutcome, DownloadConfig, DownloadEngine};
pub use filename::FilenameResolver;
pub use planner::{ChunkPlan, ChunkPlanner, ChunkRange, TransferMode};
pub use probe::{ProbeResult, SizeProbe};
pub use progress::{ChunkProgress, ProgressAggregator, ProgressSnapshot};
pub use worker::{ChunkOutcome, ChunkWorker};
