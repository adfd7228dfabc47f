//! Job orchestration: state machine, single-job guard, retries, batches

pub mod manager;
pub mod state;

pub use manager::{validate_url, ControllerConfig, DownloadController, JobOutcome, StartedJob};
pub use state::{
    BatchItemResult, BatchItemStatus, BatchReport, DownloadJob, DownloadKind, JobState,
    StartOptions, StatusBoard, StatusReport,
};
