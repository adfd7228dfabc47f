use crate::controller::state::{BatchReport, StartOptions, StatusReport};
use crate::history::store::HistoryRecord;
use crate::utils::format::{format_eta, format_size, format_speed};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Body of `POST /start_download`
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub url: String,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    #[serde(default)]
    pub options: StartOptions,
}

/// Body of `POST /start_video_download`
#[derive(Debug, Clone, Deserialize)]
pub struct VideoRequest {
    pub url: String,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    #[serde(default)]
    pub subtitles: bool,
    /// Maximum video height, e.g. 1080
    #[serde(default)]
    pub quality: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartResponse {
    pub status: &'static str,
    pub job_id: Uuid,
    pub file_name: String,
}

/// Plain `{status, message}` reply
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub status: &'static str,
    pub message: String,
}

impl MessageResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "Success",
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "Error",
            message: message.into(),
        }
    }
}

/// Status report plus human-readable progress strings
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub report: StatusReport,
    pub downloaded: String,
    pub total: String,
    pub speed: String,
    pub eta: String,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        let progress = &report.progress;
        let total = if progress.bytes_total == 0 {
            "unknown".to_string()
        } else {
            format_size(progress.bytes_total)
        };
        Self {
            downloaded: format_size(progress.bytes_downloaded),
            total,
            speed: format_speed(progress.speed_bps),
            eta: format_eta(progress.eta_seconds),
            report,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStartResponse {
    pub status: &'static str,
    pub accepted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStatusResponse {
    #[serde(flatten)]
    pub report: BatchReport,
    pub completed: usize,
}

impl From<BatchReport> for BatchStatusResponse {
    fn from(report: BatchReport) -> Self {
        Self {
            completed: report.results.len(),
            report,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub status: &'static str,
    pub history: Vec<HistoryRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub file_path: PathBuf,
    #[serde(default)]
    pub delete_file: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
    pub removed: bool,
}
