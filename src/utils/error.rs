//! Error handling for miaobox

use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for miaobox
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server responded with HTTP {0}")]
    HttpStatus(StatusCode),

    #[error("Server ignored the range request for chunk {chunk_id} (HTTP {status})")]
    RangeNotHonored { chunk_id: usize, status: StatusCode },

    #[error("Download incomplete: expected {expected} bytes, received {actual}")]
    Incomplete { expected: u64, actual: u64 },

    #[error("Chunk {chunk_id} failed: {source}")]
    ChunkFailed {
        chunk_id: usize,
        #[source]
        source: Box<LoaderError>,
    },

    #[error("Unsafe file path outside the save directory: {}", .0.display())]
    PathTraversal(PathBuf),

    #[error("Content type not allowed: {0}")]
    DisallowedContentType(String),

    #[error("A download is already in progress")]
    Conflict,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("yt-dlp not found. Please install yt-dlp")]
    YtDlpNotFound,

    #[error("Failed to extract media: {0}")]
    Extraction(String),

    /// Stopped by a cancel request; `partial` is the output that was removed
    #[error("Download cancelled")]
    Cancelled { partial: Option<PathBuf> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl LoaderError {
    /// Whether the controller may retry the whole job after this error.
    pub fn is_network(&self) -> bool {
        match self {
            LoaderError::Network(e) => !e.is_builder(),
            LoaderError::Timeout(_) | LoaderError::HttpStatus(_) | LoaderError::Incomplete { .. } => {
                true
            }
            LoaderError::ChunkFailed { source, .. } => source.is_network(),
            _ => false,
        }
    }

    /// Short machine-readable tag, used in logs and API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            LoaderError::Network(_)
            | LoaderError::Timeout(_)
            | LoaderError::HttpStatus(_)
            | LoaderError::Incomplete { .. } => "network",
            LoaderError::RangeNotHonored { .. } => "range_not_honored",
            LoaderError::ChunkFailed { .. } => "partial_chunk_failure",
            LoaderError::PathTraversal(_) => "path_traversal",
            LoaderError::DisallowedContentType(_) => "disallowed_content_type",
            LoaderError::Conflict => "conflict",
            LoaderError::InvalidInput(_) => "invalid_input",
            LoaderError::YtDlpNotFound | LoaderError::Extraction(_) => "extraction",
            LoaderError::Cancelled { .. } => "cancelled",
            LoaderError::Io(_) => "io",
            LoaderError::Serialization(_) => "serialization",
            LoaderError::Join(_) => "internal",
        }
    }
}

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;
