//! Multi-threaded download engine: one Probing→Finalizing attempt per call

use crate::controller::state::{DownloadJob, JobState, StatusBoard};
use crate::downloader::cancel::CancelFlag;
use crate::downloader::filename::{prepare_destination, FilenameResolver};
use crate::downloader::planner::{ChunkPlan, ChunkPlanner, TransferMode};
use crate::downloader::probe::{ProbeResult, SizeProbe, SAMPLE_SIZE};
use crate::downloader::progress::ProgressAggregator;
use crate::downloader::worker::{ChunkOutcome, ChunkWorker};
use crate::utils::error::{LoaderError, Result};
use bytes::Bytes;
use chrono::Local;
use futures::future::join_all;
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, USER_AGENT};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tracing::{debug, info, warn};

/// Download engine configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub max_threads: usize,
    pub min_chunk_size: u64,
    /// Probe timeout, and connect/read timeout for chunk transfers
    pub timeout: Duration,
    pub progress_interval: Duration,
    pub allowed_content_types: Option<Vec<String>>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_threads: 8,
            min_chunk_size: 1024 * 1024, // 1MB
            timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(100),
            allowed_content_types: None,
        }
    }
}

/// How an attempt ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed {
        path: PathBuf,
        file_name: String,
        bytes: u64,
    },
    /// The partial file (if any) has already been removed
    Cancelled {
        path: Option<PathBuf>,
        file_name: Option<String>,
        bytes: u64,
    },
}

/// Where a running attempt writes, once known
struct Target {
    path: PathBuf,
    file_name: String,
    aggregator: Arc<ProgressAggregator>,
    /// Expected size; 0 when the server never said
    expected: u64,
}

/// Download engine
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    client: Client,
    config: DownloadConfig,
    probe: SizeProbe,
    planner: ChunkPlanner,
}

impl DownloadEngine {
    /// Create a new download engine
    pub fn new(config: DownloadConfig) -> Result<Self> {
        // No whole-request timeout: a chunk of a large file may legitimately take minutes
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: DownloadConfig) -> Self {
        let probe = SizeProbe::new(client.clone(), config.timeout);
        let planner = ChunkPlanner::new(config.min_chunk_size, config.max_threads);
        Self {
            client,
            config,
            probe,
            planner,
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Run one full attempt for `job`, publishing state and progress on `board`.
    ///
    /// On error the partial file is removed before returning.
    pub async fn run_attempt(
        &self,
        job: &mut DownloadJob,
        board: &StatusBoard,
    ) -> Result<AttemptOutcome> {
        board.set_state(JobState::Probing);
        let resolver = prepare_destination(&job.save_root, &job.destination_dir).await?;
        let probe = self.probe.probe(&job.url, &job.user_agent).await?;
        self.check_content_type(&probe)?;
        if job.cancel.is_cancelled() {
            return Ok(cancelled_before_transfer());
        }

        board.set_state(JobState::Planning);
        job.total_size = probe.total_size;
        let plan = self.planner.plan(probe.total_size, probe.supports_ranges);
        info!(
            url = %job.url,
            total_size = plan.total_size,
            mode = ?plan.mode,
            chunks = plan.chunk_count(),
            "Planned download"
        );

        let (target, result) = match plan.mode {
            TransferMode::Parallel => self.run_parallel(job, board, &plan, &probe, &resolver).await?,
            TransferMode::Single => self.run_single(job, board, &plan, &probe, &resolver).await?,
        };

        board.set_state(JobState::Finalizing);
        self.finalize(job, target, result).await
    }

    fn check_content_type(&self, probe: &ProbeResult) -> Result<()> {
        let Some(allowed) = &self.config.allowed_content_types else {
            return Ok(());
        };

        let mime = probe.mime_type().unwrap_or_else(|| "unknown".to_string());
        if allowed.iter().any(|a| a.eq_ignore_ascii_case(&mime)) {
            Ok(())
        } else {
            Err(LoaderError::DisallowedContentType(mime))
        }
    }

    async fn run_parallel(
        &self,
        job: &DownloadJob,
        board: &StatusBoard,
        plan: &ChunkPlan,
        probe: &ProbeResult,
        resolver: &FilenameResolver,
    ) -> Result<(Target, Result<()>)> {
        let sample = self.probe.fetch_sample(&job.url, &job.user_agent).await?;
        let (file_name, path) = resolver.resolve(
            probe.content_disposition.as_deref(),
            &job.url,
            &sample,
            Local::now(),
        )?;

        preallocate(&path, plan.total_size).await?;

        let aggregator = Arc::new(ProgressAggregator::new(plan, self.config.progress_interval));
        board.attach(&file_name, &path, Arc::clone(&aggregator));
        board.set_state(JobState::Downloading);

        let halt = CancelFlag::new();
        let handles: Vec<_> = plan
            .ranges
            .iter()
            .map(|range| {
                let worker = ChunkWorker::new(
                    *range,
                    Some(range.len()),
                    path.clone(),
                    job.cancel.clone(),
                    halt.clone(),
                    Arc::clone(&aggregator),
                );
                let client = self.client.clone();
                let url = job.url.clone();
                let user_agent = job.user_agent.clone();
                let halt = halt.clone();
                let chunk_id = range.id;

                tokio::spawn(async move {
                    let result = worker.run(&client, &url, &user_agent).await;
                    if let Err(e) = &result {
                        warn!(chunk = chunk_id, url = %url, error = %e, "Chunk failed, halting siblings");
                        halt.cancel();
                    }
                    (chunk_id, result)
                })
            })
            .collect();

        // Every worker is joined before the first failure is reported
        let mut failure = None;
        for joined in join_all(handles).await {
            let (chunk_id, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    failure.get_or_insert(LoaderError::Join(e.to_string()));
                    continue;
                }
            };
            if let Err(source) = result {
                if failure.is_none() {
                    failure = Some(LoaderError::ChunkFailed {
                        chunk_id,
                        source: Box::new(source),
                    });
                }
            }
        }

        let target = Target {
            path,
            file_name,
            aggregator,
            expected: plan.total_size,
        };
        Ok((target, failure.map_or(Ok(()), Err)))
    }

    async fn run_single(
        &self,
        job: &DownloadJob,
        board: &StatusBoard,
        plan: &ChunkPlan,
        probe: &ProbeResult,
        resolver: &FilenameResolver,
    ) -> Result<(Target, Result<()>)> {
        let response = self
            .client
            .get(&job.url)
            .header(USER_AGENT, &job.user_agent)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::HttpStatus(status));
        }

        let expected = match (plan.total_size, response.content_length()) {
            (0, Some(len)) => len,
            (known, _) => known,
        };
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| probe.content_disposition.clone());

        // Buffer the head of the body for the content hash
        let mut body = response.bytes_stream();
        let mut buffered: Vec<Bytes> = Vec::new();
        let mut buffered_len = 0;
        while buffered_len < SAMPLE_SIZE {
            match body.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    buffered_len += chunk.len();
                    buffered.push(chunk);
                }
                None => break,
            }
        }
        let sample: Vec<u8> = buffered
            .iter()
            .flat_map(|b| b.iter().copied())
            .take(SAMPLE_SIZE)
            .collect();

        let (file_name, path) =
            resolver.resolve(disposition.as_deref(), &job.url, &sample, Local::now())?;
        File::create(&path).await?;

        let aggregator = Arc::new(ProgressAggregator::new(plan, self.config.progress_interval));
        if expected != plan.total_size {
            aggregator.set_total(expected);
        }
        board.attach(&file_name, &path, Arc::clone(&aggregator));
        board.set_state(JobState::Downloading);

        let worker = ChunkWorker::new(
            plan.ranges[0],
            (expected > 0).then_some(expected),
            path.clone(),
            job.cancel.clone(),
            CancelFlag::new(),
            Arc::clone(&aggregator),
        );
        let result = worker
            .continue_stream(buffered, body)
            .await
            .map(|outcome: ChunkOutcome| debug!(bytes = outcome.bytes(), "Single stream ended"))
            .map_err(|source| LoaderError::ChunkFailed {
                chunk_id: 0,
                source: Box::new(source),
            });

        let target = Target {
            path,
            file_name,
            aggregator,
            expected,
        };
        Ok((target, result))
    }

    async fn finalize(
        &self,
        job: &DownloadJob,
        target: Target,
        result: Result<()>,
    ) -> Result<AttemptOutcome> {
        let written = target.aggregator.total_written();

        if job.cancel.is_cancelled() {
            remove_partial(&target.path).await;
            info!(url = %job.url, bytes = written, "Download cancelled");
            return Ok(AttemptOutcome::Cancelled {
                path: Some(target.path),
                file_name: Some(target.file_name),
                bytes: written,
            });
        }

        if let Err(e) = result {
            remove_partial(&target.path).await;
            return Err(e);
        }

        if target.expected > 0 && written != target.expected {
            remove_partial(&target.path).await;
            return Err(LoaderError::Incomplete {
                expected: target.expected,
                actual: written,
            });
        }

        info!(
            url = %job.url,
            file = %target.path.display(),
            bytes = written,
            "Download completed"
        );
        Ok(AttemptOutcome::Completed {
            path: target.path,
            file_name: target.file_name,
            bytes: written,
        })
    }
}

/// Create `path` at its final length; a failed resize leaves no file behind
async fn preallocate(path: &Path, len: u64) -> Result<()> {
    let file = File::create(path).await?;
    if let Err(e) = file.set_len(len).await {
        drop(file);
        remove_partial(path).await;
        return Err(e.into());
    }
    Ok(())
}

fn cancelled_before_transfer() -> AttemptOutcome {
    AttemptOutcome::Cancelled {
        path: None,
        file_name: None,
        bytes: 0,
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DownloadConfig::default();
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.min_chunk_size, 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_content_type_allow_list() {
        let engine = DownloadEngine::new(DownloadConfig {
            allowed_content_types: Some(vec!["application/zip".to_string()]),
            ..Default::default()
        })
        .unwrap();

        let zip = ProbeResult {
            content_type: Some("application/zip; name=x".to_string()),
            ..Default::default()
        };
        assert!(engine.check_content_type(&zip).is_ok());

        let html = ProbeResult {
            content_type: Some("text/html".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            engine.check_content_type(&html),
            Err(LoaderError::DisallowedContentType(t)) if t == "text/html"
        ));

        assert!(engine.check_content_type(&ProbeResult::default()).is_err());
    }

    #[test]
    fn test_no_allow_list_accepts_everything() {
        let engine = DownloadEngine::new(DownloadConfig::default()).unwrap();
        assert!(engine.check_content_type(&ProbeResult::default()).is_ok());
    }

    #[tokio::test]
    async fn test_failed_preallocation_removes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("huge.bin");

        let err = preallocate(&path, u64::MAX).await.unwrap_err();
        assert!(matches!(err, LoaderError::Io(_)));
        assert!(!path.exists());

        preallocate(&path, 4096).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }
}
