//! Download history persisted as a JSON array, newest first

use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Completed,
    Cancelled,
}

/// One finished or cancelled download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub url: String,
    pub file_path: PathBuf,
    pub file_name: String,
    pub file_type: FileKind,
    /// For cancelled downloads, the bytes written before cancellation
    pub file_size_bytes: u64,
    pub timestamp: DateTime<Utc>,
    pub status: HistoryStatus,
}

impl HistoryRecord {
    pub fn new(
        url: impl Into<String>,
        file_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        file_type: FileKind,
        file_size_bytes: u64,
        status: HistoryStatus,
    ) -> Self {
        Self {
            url: url.into(),
            file_path: file_path.into(),
            file_name: file_name.into(),
            file_type,
            file_size_bytes,
            timestamp: Utc::now(),
            status,
        }
    }
}

/// Append-only history log.
///
/// Every mutation rewrites the file through a temp file and rename, under the
/// same lock that guards the in-memory list.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    records: Mutex<Vec<HistoryRecord>>,
}

impl HistoryStore {
    /// Open the store, loading existing records.
    ///
    /// A corrupt file is logged and replaced on the next write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => match serde_json::from_str::<Vec<HistoryRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    warn!("Failed to parse history file {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        info!("Loaded {} history records from {}", records.len(), path.display());
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a record at the front and persist.
    ///
    /// Memory only changes once the write succeeds.
    pub async fn append(&self, record: HistoryRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        debug!(url = %record.url, status = ?record.status, "Appending history record");
        let mut updated = Vec::with_capacity(records.len() + 1);
        updated.push(record);
        updated.extend(records.iter().cloned());
        self.persist(&updated).await?;
        *records = updated;
        Ok(())
    }

    /// Up to `limit` records, newest first
    pub async fn list(&self, limit: usize) -> Vec<HistoryRecord> {
        self.records.lock().await.iter().take(limit).cloned().collect()
    }

    /// Remove the record for `file_path`, optionally deleting the file too.
    ///
    /// Returns whether a record was found.
    pub async fn remove(&self, file_path: &Path, delete_file: bool) -> Result<bool> {
        let mut records = self.records.lock().await;
        let Some(index) = records.iter().position(|r| r.file_path == file_path) else {
            return Ok(false);
        };

        let mut updated = records.clone();
        let removed = updated.remove(index);
        self.persist(&updated).await?;
        *records = updated;

        if delete_file {
            match tokio::fs::remove_file(&removed.file_path).await {
                Ok(()) => info!("Deleted {}", removed.file_path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("File {} already gone", removed.file_path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(true)
    }

    async fn persist(&self, records: &[HistoryRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
