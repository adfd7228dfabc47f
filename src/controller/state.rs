//! Job state, request options and the shared status board

use crate::downloader::cancel::CancelFlag;
use crate::downloader::progress::{ProgressAggregator, ProgressSnapshot};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle of the current job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Probing,
    Planning,
    Downloading,
    Finalizing,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

/// Which path a job takes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    /// Media-looking URLs go to the extractor when one is available
    #[default]
    Auto,
    File,
    Media,
}

/// Caller-supplied options for `start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    pub kind: DownloadKind,
    pub subtitles: bool,
    /// Maximum video height for media jobs
    pub quality: Option<u32>,
    pub user_agent: Option<String>,
    pub max_retries: Option<usize>,
}

/// A job as owned by its task
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: Uuid,
    pub url: String,
    /// Configured save root; every file must land inside it
    pub save_root: PathBuf,
    /// Caller's destination: the root, a path below it, or a relative subdirectory
    pub destination_dir: PathBuf,
    pub max_retries: usize,
    pub user_agent: String,
    pub cancel: CancelFlag,
    /// Learned during probing; 0 when unknown
    pub total_size: u64,
    pub options: StartOptions,
}

/// Point-in-time status of the current (or last) job
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub job_id: Option<Uuid>,
    pub state: JobState,
    pub url: Option<String>,
    pub file_name: Option<String>,
    pub file_path: Option<PathBuf>,
    pub message: Option<String>,
    pub attempt: usize,
    pub progress: ProgressSnapshot,
}

#[derive(Debug, Default)]
struct BoardInner {
    report: StatusReport,
    aggregator: Option<Arc<ProgressAggregator>>,
}

/// Shared, lock-protected view of the running job.
///
/// Progress is read from the attached aggregator at report time, so workers
/// never touch this lock.
#[derive(Debug, Default)]
pub struct StatusBoard {
    inner: RwLock<BoardInner>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a new job
    pub fn begin(&self, job_id: Uuid, url: &str, file_name: &str) {
        let mut inner = self.inner.write();
        *inner = BoardInner {
            report: StatusReport {
                job_id: Some(job_id),
                state: JobState::Probing,
                url: Some(url.to_string()),
                file_name: Some(file_name.to_string()),
                ..Default::default()
            },
            aggregator: None,
        };
    }

    pub fn set_state(&self, state: JobState) {
        self.inner.write().report.state = state;
    }

    pub fn set_attempt(&self, attempt: usize) {
        self.inner.write().report.attempt = attempt;
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.inner.write().report.message = Some(message.into());
    }

    /// Record the resolved file and the aggregator publishing its progress
    pub fn attach(&self, file_name: &str, path: &Path, aggregator: Arc<ProgressAggregator>) {
        let mut inner = self.inner.write();
        inner.report.file_name = Some(file_name.to_string());
        inner.report.file_path = Some(path.to_path_buf());
        inner.aggregator = Some(aggregator);
    }

    /// Track progress for a stream whose file path is not known yet
    pub fn track(&self, label: &str, aggregator: Arc<ProgressAggregator>) {
        let mut inner = self.inner.write();
        inner.report.file_name = Some(label.to_string());
        inner.aggregator = Some(aggregator);
    }

    /// Enter a terminal state, freezing the last progress snapshot
    pub fn finish(&self, state: JobState, message: impl Into<String>) {
        let mut inner = self.inner.write();
        if let Some(aggregator) = inner.aggregator.take() {
            inner.report.progress = (*aggregator.snapshot()).clone();
        }
        inner.report.state = state;
        inner.report.message = Some(message.into());
    }

    pub fn state(&self) -> JobState {
        self.inner.read().report.state
    }

    pub fn report(&self) -> StatusReport {
        let inner = self.inner.read();
        let mut report = inner.report.clone();
        if let Some(aggregator) = &inner.aggregator {
            report.progress = (*aggregator.snapshot()).clone();
        }
        report
    }
}

/// Outcome of one URL in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchItemStatus {
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemResult {
    pub url: String,
    pub status: BatchItemStatus,
    pub file_name: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub running: bool,
    pub total: usize,
    pub results: Vec<BatchItemResult>,
}
