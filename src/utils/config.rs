//! Application configuration

use crate::downloader::DownloadConfig;
use crate::utils::paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0";

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Default directory downloads are saved into
    pub save_path: PathBuf,

    /// JSON file holding the download history
    pub history_file: PathBuf,

    /// Log file written alongside the console; `null` disables it
    pub log_file: Option<PathBuf>,

    /// Address the web API binds to
    pub listen_addr: String,

    /// Whole-job attempts for network failures
    pub max_retries: usize,

    /// Pause between attempts (milliseconds)
    pub retry_delay_ms: u64,

    /// Probe and read timeout (seconds)
    pub download_timeout_secs: u64,

    /// Minimum spacing between speed samples (milliseconds)
    pub progress_interval_ms: u64,

    /// Upper bound on parallel chunk workers
    pub max_threads: usize,

    /// Files smaller than this are fetched with a single stream (bytes)
    pub min_chunk_size: u64,

    pub user_agent: String,

    /// When set, only these MIME types may be downloaded
    pub allowed_content_types: Option<Vec<String>>,

    /// Explicit yt-dlp binary; searched on PATH when unset
    pub ytdlp_path: Option<PathBuf>,

    /// Netscape cookies file handed to the extractor for sites that need a login
    pub cookies_file: Option<PathBuf>,

    /// Subtitle languages requested when subtitles are enabled
    pub subtitle_langs: Vec<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            save_path: paths::get_downloads_dir(),
            history_file: paths::get_history_path(),
            log_file: Some(paths::get_log_path()),
            listen_addr: "127.0.0.1:5000".to_string(),
            max_retries: 3,
            retry_delay_ms: 2000,
            download_timeout_secs: 30,
            progress_interval_ms: 100,
            max_threads: 8,
            min_chunk_size: 1024 * 1024, // 1MB
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allowed_content_types: None,
            ytdlp_path: None,
            cookies_file: None,
            subtitle_langs: vec!["zh-Hans".to_string(), "en".to_string()],
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file, falling back to defaults when the file is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings file {}", path.display()))?;
                let parsed: AppSettings = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
                info!("Loaded settings from {}", path.display());
                parsed
            }
            Some(path) => {
                debug!("Settings file {} not found, using defaults", path.display());
                AppSettings::default()
            }
            None => AppSettings::default(),
        };

        Ok(settings.validated())
    }

    /// Enforce sane minimums
    pub fn validated(mut self) -> Self {
        if self.max_retries == 0 {
            self.max_retries = 1;
        }
        if self.max_threads == 0 {
            self.max_threads = 1;
        }
        if self.min_chunk_size == 0 {
            self.min_chunk_size = 1;
        }
        if self.download_timeout_secs == 0 {
            self.download_timeout_secs = 1;
        }
        self
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Engine configuration derived from these settings
    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            max_threads: self.max_threads,
            min_chunk_size: self.min_chunk_size,
            timeout: self.download_timeout(),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            allowed_content_types: self.allowed_content_types.clone(),
        }
    }
}
