//! Download controller: one active job process-wide, retries, cancellation
//! and history writes.

use crate::controller::state::{
    BatchItemResult, BatchItemStatus, BatchReport, DownloadJob, DownloadKind, JobState,
    StartOptions, StatusBoard, StatusReport,
};
use crate::downloader::cancel::CancelFlag;
use crate::downloader::engine::{AttemptOutcome, DownloadEngine};
use crate::downloader::filename::{prepare_destination, provisional_name};
use crate::downloader::progress::ProgressAggregator;
use crate::extractor::models::{FetchOptions, MediaProgress, ProgressCallback};
use crate::extractor::profile::{is_media_url, ProfileOptions, SiteProfile};
use crate::extractor::traits::MediaExtractor;
use crate::history::store::{FileKind, HistoryRecord, HistoryStatus, HistoryStore};
use crate::utils::config::AppSettings;
use crate::utils::error::{LoaderError, Result};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// Controller settings derived from [`AppSettings`]
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub save_path: PathBuf,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub user_agent: String,
    pub progress_interval: Duration,
    pub subtitle_langs: Vec<String>,
    pub cookies_file: Option<PathBuf>,
}

impl ControllerConfig {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            save_path: settings.save_path.clone(),
            max_retries: settings.max_retries.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            user_agent: settings.user_agent.clone(),
            progress_interval: Duration::from_millis(settings.progress_interval_ms),
            subtitle_langs: settings.subtitle_langs.clone(),
            cookies_file: settings.cookies_file.clone(),
        }
    }
}

/// Returned by `start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedJob {
    pub job_id: Uuid,
    /// Derived from the URL; the resolved name shows up in `status`
    pub file_name: String,
}

/// Final result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        file_name: String,
        path: PathBuf,
        bytes: u64,
    },
    Cancelled {
        bytes: u64,
    },
    Failed {
        kind: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    File,
    Media,
}

struct Shared {
    engine: DownloadEngine,
    extractor: Option<Arc<dyn MediaExtractor>>,
    history: Arc<HistoryStore>,
    config: ControllerConfig,
    active: AtomicBool,
    board: StatusBoard,
    cancel: Mutex<Option<CancelFlag>>,
    /// Also serializes launching against `cancel`
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    last_outcome: Mutex<Option<JobOutcome>>,
    batch: RwLock<BatchReport>,
}

/// Holds the process-wide active flag; releases it on drop
struct ActiveGuard {
    shared: Arc<Shared>,
}

impl ActiveGuard {
    fn claim(shared: &Arc<Shared>) -> Option<Self> {
        shared
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                shared: Arc::clone(shared),
            })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates downloads. Cheap to clone; clones share one controller.
#[derive(Clone)]
pub struct DownloadController {
    shared: Arc<Shared>,
}

impl DownloadController {
    pub fn new(
        engine: DownloadEngine,
        history: Arc<HistoryStore>,
        extractor: Option<Arc<dyn MediaExtractor>>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                extractor,
                history,
                config,
                active: AtomicBool::new(false),
                board: StatusBoard::new(),
                cancel: Mutex::new(None),
                task: tokio::sync::Mutex::new(None),
                last_outcome: Mutex::new(None),
                batch: RwLock::new(BatchReport::default()),
            }),
        }
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.shared.history
    }

    pub fn has_extractor(&self) -> bool {
        self.shared.extractor.is_some()
    }

    /// Whether a job or batch currently holds the guard
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Start a single download in the background.
    ///
    /// Fails with `Conflict` while any job or batch is active, and with
    /// `InvalidInput` for malformed URLs.
    pub async fn start(
        &self,
        url: &str,
        destination: Option<PathBuf>,
        options: StartOptions,
    ) -> Result<StartedJob> {
        validate_url(url)?;
        let route = self.route(url, options.kind)?;

        // Claim, flag install and spawn happen under the task lock
        let mut task = self.shared.task.lock().await;
        let guard = ActiveGuard::claim(&self.shared).ok_or(LoaderError::Conflict)?;
        let cancel = CancelFlag::new();
        let job = self.new_job(url, destination, options, cancel.clone());
        let started = StartedJob {
            job_id: job.id,
            file_name: provisional_name(url),
        };

        info!(job_id = %job.id, url, route = ?route, "Starting download");
        self.shared.board.begin(job.id, url, &started.file_name);
        *self.shared.cancel.lock() = Some(cancel);
        *self.shared.last_outcome.lock() = None;

        let shared = Arc::clone(&self.shared);
        let span = info_span!("job", id = %job.id);
        *task = Some(tokio::spawn(
            async move {
                let _guard = guard;
                let outcome = shared.run_job(job, route).await;
                *shared.last_outcome.lock() = Some(outcome);
            }
            .instrument(span),
        ));

        Ok(started)
    }

    /// Cancel the active job or batch and wait for it to wind down.
    ///
    /// Returns whether anything was active. Calling it again is harmless.
    pub async fn cancel(&self) -> bool {
        let handle = {
            let mut task = self.shared.task.lock().await;
            if !self.is_active() {
                return false;
            }
            if let Some(flag) = self.shared.cancel.lock().clone() {
                flag.cancel();
            }
            info!("Cancellation requested");
            task.take()
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Download task failed while cancelling: {}", e);
            }
        }

        // Another caller may own the handle; the guard drops when the task ends
        while self.is_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    pub fn status(&self) -> StatusReport {
        self.shared.board.report()
    }

    /// Wait for the current job or batch to finish, returning the last job outcome.
    pub async fn wait(&self) -> Option<JobOutcome> {
        let handle = self.shared.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Download task failed: {}", e);
            }
        }
        while self.is_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.shared.last_outcome.lock().clone()
    }

    /// Run `urls` one after another under the single-job guard.
    ///
    /// Every URL is validated before anything starts.
    pub async fn batch_start(&self, urls: &[String], destination: Option<PathBuf>) -> Result<usize> {
        if urls.is_empty() {
            return Err(LoaderError::InvalidInput("No URLs provided".to_string()));
        }
        let invalid: Vec<&str> = urls
            .iter()
            .filter(|u| validate_url(u).is_err())
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(LoaderError::InvalidInput(format!(
                "Invalid URLs: {}",
                invalid.join(", ")
            )));
        }

        let mut task = self.shared.task.lock().await;
        let guard = ActiveGuard::claim(&self.shared).ok_or(LoaderError::Conflict)?;
        let cancel = CancelFlag::new();
        *self.shared.cancel.lock() = Some(cancel.clone());
        *self.shared.last_outcome.lock() = None;
        *self.shared.batch.write() = BatchReport {
            running: true,
            total: urls.len(),
            results: Vec::new(),
        };
        info!(count = urls.len(), "Starting batch download");

        let urls = urls.to_vec();
        let controller = self.clone();
        *task = Some(tokio::spawn(
            async move {
                let _guard = guard;
                controller.run_batch(urls, destination, cancel).await;
            }
            .instrument(info_span!("batch")),
        ));

        Ok(self.shared.batch.read().total)
    }

    pub fn batch_status(&self) -> BatchReport {
        self.shared.batch.read().clone()
    }

    async fn run_batch(&self, urls: Vec<String>, destination: Option<PathBuf>, cancel: CancelFlag) {
        for url in urls {
            if cancel.is_cancelled() {
                info!("Batch cancelled, skipping remaining URLs");
                break;
            }

            let result = match self.route(&url, DownloadKind::Auto) {
                Ok(route) => {
                    let job = self.new_job(&url, destination.clone(), StartOptions::default(), cancel.clone());
                    self.shared.board.begin(job.id, &url, &provisional_name(&url));
                    let outcome = self.shared.run_job(job, route).await;
                    let result = batch_result(&url, &outcome);
                    *self.shared.last_outcome.lock() = Some(outcome);
                    result
                }
                Err(e) => BatchItemResult {
                    url: url.clone(),
                    status: BatchItemStatus::Failed,
                    file_name: None,
                    error: Some(e.to_string()),
                },
            };

            self.shared.batch.write().results.push(result);
        }

        self.shared.batch.write().running = false;
        info!("Batch finished");
    }

    fn route(&self, url: &str, kind: DownloadKind) -> Result<Route> {
        let wants_media = match kind {
            DownloadKind::File => false,
            DownloadKind::Media => true,
            DownloadKind::Auto => {
                is_media_url(url)
                    || self
                        .shared
                        .extractor
                        .as_ref()
                        .is_some_and(|e| e.supports(url))
            }
        };

        if !wants_media {
            return Ok(Route::File);
        }
        if self.shared.extractor.is_none() {
            return Err(LoaderError::InvalidInput(
                "Media download requested but no media extractor is available".to_string(),
            ));
        }
        Ok(Route::Media)
    }

    fn new_job(
        &self,
        url: &str,
        destination: Option<PathBuf>,
        options: StartOptions,
        cancel: CancelFlag,
    ) -> DownloadJob {
        let config = &self.shared.config;
        DownloadJob {
            id: Uuid::new_v4(),
            url: url.to_string(),
            save_root: config.save_path.clone(),
            destination_dir: destination.unwrap_or_else(|| config.save_path.clone()),
            max_retries: options.max_retries.unwrap_or(config.max_retries).max(1),
            user_agent: options
                .user_agent
                .clone()
                .unwrap_or_else(|| config.user_agent.clone()),
            cancel,
            total_size: 0,
            options,
        }
    }
}

impl Shared {
    async fn run_job(&self, job: DownloadJob, route: Route) -> JobOutcome {
        match route {
            Route::File => self.run_file(job).await,
            Route::Media => self.run_media(job).await,
        }
    }

    /// HTTP path: whole attempts retried for network-classed errors
    async fn run_file(&self, mut job: DownloadJob) -> JobOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.board.set_attempt(attempt);

            let error = match self.engine.run_attempt(&mut job, &self.board).await {
                Ok(AttemptOutcome::Completed {
                    path,
                    file_name,
                    bytes,
                }) => {
                    self.record(&job, &path, &file_name, FileKind::File, bytes, HistoryStatus::Completed)
                        .await;
                    self.board.finish(JobState::Completed, "Download completed");
                    return JobOutcome::Completed {
                        file_name,
                        path,
                        bytes,
                    };
                }
                Ok(AttemptOutcome::Cancelled {
                    path,
                    file_name,
                    bytes,
                }) => {
                    return self
                        .finish_cancelled(&job, path, file_name, FileKind::File, bytes)
                        .await;
                }
                Err(e) => e,
            };

            if job.cancel.is_cancelled() {
                debug!("Attempt ended with {} after cancellation", error);
                return self
                    .finish_cancelled(&job, None, None, FileKind::File, 0)
                    .await;
            }

            if error.is_network() && attempt < job.max_retries {
                warn!(
                    url = %job.url,
                    attempt,
                    max_retries = job.max_retries,
                    error = %error,
                    "Download attempt failed, retrying"
                );
                self.board.set_message(format!(
                    "Attempt {} of {} failed: {}; retrying",
                    attempt, job.max_retries, error
                ));

                tokio::select! {
                    _ = tokio::time::sleep(self.config.retry_delay) => continue,
                    _ = job.cancel.cancelled() => {
                        return self
                            .finish_cancelled(&job, None, None, FileKind::File, 0)
                            .await;
                    }
                }
            }

            error!(
                url = %job.url,
                attempt,
                kind = error.kind(),
                error = %error,
                "Download failed"
            );
            self.board.finish(JobState::Failed, error.to_string());
            return JobOutcome::Failed {
                kind: error.kind(),
                message: error.to_string(),
            };
        }
    }

    /// Media path: probe, then fetch the entries one at a time
    async fn run_media(&self, job: DownloadJob) -> JobOutcome {
        let Some(extractor) = self.extractor.clone() else {
            return self.fail(LoaderError::InvalidInput(
                "No media extractor is available".to_string(),
            ));
        };

        self.board.set_attempt(1);
        self.board.set_state(JobState::Probing);
        let resolver = match prepare_destination(&job.save_root, &job.destination_dir).await {
            Ok(resolver) => resolver,
            Err(e) => return self.fail(e),
        };
        let probe = match extractor.probe(&job.url).await {
            Ok(probe) => probe,
            Err(_) if job.cancel.is_cancelled() => {
                return self
                    .finish_cancelled(&job, None, None, FileKind::Video, 0)
                    .await;
            }
            Err(e) => return self.fail(e),
        };
        if probe.entries.is_empty() {
            return self.fail(LoaderError::Extraction("Nothing to download".to_string()));
        }

        self.board.set_state(JobState::Planning);
        let profile = SiteProfile::resolve(
            &job.url,
            &ProfileOptions {
                quality: job.options.quality,
                subtitles: job.options.subtitles,
                subtitle_langs: self.config.subtitle_langs.clone(),
                cookies_file: self.config.cookies_file.clone(),
            },
        );
        let options = FetchOptions {
            save_dir: resolver.destination().to_path_buf(),
            profile,
            user_agent: job.user_agent.clone(),
            retries: job.max_retries,
            cancel: job.cancel.clone(),
        };
        info!(
            url = %job.url,
            playlist = probe.is_playlist,
            entries = probe.entries.len(),
            "Fetching media"
        );

        self.board.set_state(JobState::Downloading);
        let total = probe.entries.len();
        let mut last: Option<(String, PathBuf, u64)> = None;
        let mut current: Option<Arc<ProgressAggregator>> = None;
        let mut cancelled_at: Option<PathBuf> = None;

        for (index, entry) in probe.entries.iter().enumerate() {
            if job.cancel.is_cancelled() {
                break;
            }

            let aggregator = Arc::new(ProgressAggregator::for_stream(0, self.config.progress_interval));
            let label = entry.title.clone().unwrap_or_else(|| provisional_name(&entry.url));
            self.board.track(&label, Arc::clone(&aggregator));
            if probe.is_playlist {
                self.board
                    .set_message(format!("Downloading {} of {}", index + 1, total));
            }
            current = Some(Arc::clone(&aggregator));

            let on_progress: ProgressCallback = {
                let aggregator = Arc::clone(&aggregator);
                Arc::new(move |p: MediaProgress| aggregator.observe(p.downloaded_bytes, p.total_bytes))
            };

            match extractor.fetch(&entry.url, &options, on_progress).await {
                Ok(path) => {
                    let file_name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or(label);
                    let bytes = match tokio::fs::metadata(&path).await {
                        Ok(meta) => meta.len(),
                        Err(_) => aggregator.total_written(),
                    };
                    let mut record_job = job.clone();
                    record_job.url = entry.url.clone();
                    self.record(&record_job, &path, &file_name, FileKind::Video, bytes, HistoryStatus::Completed)
                        .await;
                    last = Some((file_name, path, bytes));
                }
                Err(LoaderError::Cancelled { partial }) => {
                    cancelled_at = partial;
                    break;
                }
                Err(_) if job.cancel.is_cancelled() => break,
                Err(e) if probe.is_playlist => {
                    warn!(url = %entry.url, error = %e, "Skipping playlist entry");
                }
                Err(e) => return self.fail(e),
            }
        }

        self.board.set_state(JobState::Finalizing);
        if job.cancel.is_cancelled() {
            let bytes = current.map(|a| a.total_written()).unwrap_or(0);
            let file_name = cancelled_at
                .as_deref()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned());
            return self
                .finish_cancelled(&job, cancelled_at, file_name, FileKind::Video, bytes)
                .await;
        }

        match last {
            Some((file_name, path, bytes)) => {
                self.board.finish(JobState::Completed, "Download completed");
                JobOutcome::Completed {
                    file_name,
                    path,
                    bytes,
                }
            }
            None => self.fail(LoaderError::Extraction(
                "No playlist entries could be downloaded".to_string(),
            )),
        }
    }

    fn fail(&self, error: LoaderError) -> JobOutcome {
        error!(kind = error.kind(), error = %error, "Download failed");
        self.board.finish(JobState::Failed, error.to_string());
        JobOutcome::Failed {
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    /// Append the single cancelled record and mark the board.
    ///
    /// The path stays empty when no output file was ever chosen.
    async fn finish_cancelled(
        &self,
        job: &DownloadJob,
        path: Option<PathBuf>,
        file_name: Option<String>,
        kind: FileKind,
        bytes: u64,
    ) -> JobOutcome {
        let report = self.board.report();
        let file_name = file_name
            .or(report.file_name)
            .unwrap_or_else(|| provisional_name(&job.url));
        let path = path
            .or(report.file_path)
            .unwrap_or_default();

        self.record(job, &path, &file_name, kind, bytes, HistoryStatus::Cancelled)
            .await;
        self.board.finish(JobState::Cancelled, "Download cancelled");
        info!(url = %job.url, bytes, "Job cancelled");
        JobOutcome::Cancelled { bytes }
    }

    async fn record(
        &self,
        job: &DownloadJob,
        path: &Path,
        file_name: &str,
        kind: FileKind,
        bytes: u64,
        status: HistoryStatus,
    ) {
        let record = HistoryRecord::new(job.url.clone(), path, file_name, kind, bytes, status);
        if let Err(e) = self.history.append(record).await {
            warn!("Failed to write history record: {}", e);
        }
    }
}

fn batch_result(url: &str, outcome: &JobOutcome) -> BatchItemResult {
    match outcome {
        JobOutcome::Completed { file_name, .. } => BatchItemResult {
            url: url.to_string(),
            status: BatchItemStatus::Success,
            file_name: Some(file_name.clone()),
            error: None,
        },
        JobOutcome::Cancelled { .. } => BatchItemResult {
            url: url.to_string(),
            status: BatchItemStatus::Cancelled,
            file_name: None,
            error: None,
        },
        JobOutcome::Failed { message, .. } => BatchItemResult {
            url: url.to_string(),
            status: BatchItemStatus::Failed,
            file_name: None,
            error: Some(message.clone()),
        },
    }
}

/// URLs need a scheme and a host
pub fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| LoaderError::InvalidInput(format!("Invalid URL {}: {}", url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LoaderError::InvalidInput(format!(
            "Unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(LoaderError::InvalidInput(format!("URL has no host: {}", url))),
    }
}
