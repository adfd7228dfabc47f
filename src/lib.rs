//! miaobox library

pub mod api;
pub mod controller;
pub mod downloader;
pub mod extractor;
pub mod history;
pub mod utils;

// Re-export main types for easier use
pub use controller::{DownloadController, JobOutcome, JobState, StartOptions, StatusReport};
pub use downloader::{DownloadConfig, DownloadEngine, ProgressSnapshot};
pub use extractor::{MediaExtractor, YtDlp};
pub use history::{HistoryRecord, HistoryStore};
pub use utils::{AppSettings, LoaderError};
