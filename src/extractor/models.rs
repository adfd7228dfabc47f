//! Data structures exchanged with media extractors

use crate::downloader::cancel::CancelFlag;
use crate::extractor::profile::SiteProfile;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// One fetchable item of a media URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub url: String,
    pub id: Option<String>,
    pub title: Option<String>,
}

/// Result of inspecting a media URL without downloading it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaProbe {
    pub is_playlist: bool,
    pub title: Option<String>,
    /// A single entry for plain videos
    pub entries: Vec<MediaEntry>,
}

/// Progress reported by the extractor while fetching
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaProgress {
    pub downloaded_bytes: u64,
    /// 0 when unknown
    pub total_bytes: u64,
    pub percentage: f64,
    pub speed_bps: f64,
}

pub type ProgressCallback = Arc<dyn Fn(MediaProgress) + Send + Sync>;

/// Per-fetch settings
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub save_dir: PathBuf,
    pub profile: SiteProfile,
    pub user_agent: String,
    pub retries: usize,
    pub cancel: CancelFlag,
}
