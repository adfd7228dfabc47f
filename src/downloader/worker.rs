//! Downloads one byte range into its region of the target file

use crate::downloader::cancel::CancelFlag;
use crate::downloader::planner::ChunkRange;
use crate::downloader::progress::ProgressAggregator;
use crate::utils::error::{LoaderError, Result};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{RANGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// How a worker stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The stream ended or the range was filled
    Finished { bytes: u64 },
    /// The job was cancelled or a sibling failed; the partial write stays in place
    Stopped { bytes: u64 },
}

impl ChunkOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            ChunkOutcome::Finished { bytes } | ChunkOutcome::Stopped { bytes } => *bytes,
        }
    }
}

/// One range, one file handle, one counter
#[derive(Debug)]
pub struct ChunkWorker {
    range: ChunkRange,
    /// Maximum bytes this worker may write; `None` when the size is unknown
    limit: Option<u64>,
    path: PathBuf,
    cancel: CancelFlag,
    halt: CancelFlag,
    aggregator: Arc<ProgressAggregator>,
}

impl ChunkWorker {
    /// `cancel` is the job's flag; `halt` is raised when a sibling worker fails.
    pub fn new(
        range: ChunkRange,
        limit: Option<u64>,
        path: PathBuf,
        cancel: CancelFlag,
        halt: CancelFlag,
        aggregator: Arc<ProgressAggregator>,
    ) -> Self {
        Self {
            range,
            limit,
            path,
            cancel,
            halt,
            aggregator,
        }
    }

    pub fn id(&self) -> usize {
        self.range.id
    }

    /// Fetch the range with its own GET. Anything but 206 is an error.
    pub async fn run(self, client: &Client, url: &str, user_agent: &str) -> Result<ChunkOutcome> {
        debug!(
            chunk = self.range.id,
            start = self.range.start,
            end = self.range.end,
            "Downloading chunk"
        );

        let request = client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(RANGE, format!("bytes={}-{}", self.range.start, self.range.end))
            .send();
        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(ChunkOutcome::Stopped { bytes: 0 }),
            _ = self.halt.cancelled() => return Ok(ChunkOutcome::Stopped { bytes: 0 }),
            response = request => response?,
        };

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT {
            if status.is_success() {
                return Err(LoaderError::RangeNotHonored {
                    chunk_id: self.range.id,
                    status,
                });
            }
            return Err(LoaderError::HttpStatus(status));
        }

        self.pump(response.bytes_stream()).await
    }

    /// Keep writing an already-open single-stream response.
    ///
    /// `buffered` holds the bytes read while sampling for the file name.
    pub async fn continue_stream<S>(self, buffered: Vec<Bytes>, rest: S) -> Result<ChunkOutcome>
    where
        S: Stream<Item = reqwest::Result<Bytes>>,
    {
        let body = stream::iter(buffered.into_iter().map(Ok)).chain(rest);
        self.pump(body).await
    }

    async fn open(&self) -> Result<File> {
        let mut file = OpenOptions::new().write(true).open(&self.path).await?;
        file.seek(SeekFrom::Start(self.range.start)).await?;
        Ok(file)
    }

    fn stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.halt.is_cancelled()
    }

    async fn pump<S>(self, body: S) -> Result<ChunkOutcome>
    where
        S: Stream<Item = reqwest::Result<Bytes>>,
    {
        futures::pin_mut!(body);
        let mut file = self.open().await?;
        let mut written = 0u64;

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                _ = self.halt.cancelled() => None,
                item = body.next() => item,
            };

            let Some(item) = item else {
                break;
            };
            let data = item?;

            if self.stopped() {
                break;
            }

            let remaining = self.limit.map_or(u64::MAX, |limit| limit - written);
            if remaining == 0 {
                warn!(chunk = self.range.id, "Server sent more data than requested, truncating");
                break;
            }
            let take = remaining.min(data.len() as u64) as usize;

            file.write_all(&data[..take]).await?;
            written += take as u64;
            self.aggregator.record(self.range.id, take as u64);
        }

        file.flush().await?;

        if self.stopped() {
            debug!(chunk = self.range.id, bytes = written, "Chunk stopped early");
            Ok(ChunkOutcome::Stopped { bytes: written })
        } else {
            debug!(chunk = self.range.id, bytes = written, "Chunk finished");
            Ok(ChunkOutcome::Finished { bytes: written })
        }
    }
}
