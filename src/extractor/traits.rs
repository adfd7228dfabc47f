use crate::extractor::models::{FetchOptions, MediaProbe, ProgressCallback};
use crate::extractor::profile::is_media_url;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Seam between the controller and whatever tool extracts media
///
/// The controller only knows this trait, so tests can substitute a fake and
/// the yt-dlp adapter stays replaceable.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Returns a unique identifier for this extractor (e.g. "yt-dlp")
    fn id(&self) -> &'static str;

    /// Checks if this extractor should handle the given URL
    fn supports(&self, url: &str) -> bool {
        is_media_url(url)
    }

    /// List what a URL contains: one video or the entries of a playlist
    async fn probe(&self, url: &str) -> Result<MediaProbe>;

    /// Download one entry into `options.save_dir`, returning the final file path.
    ///
    /// Implementations stop promptly once `options.cancel` is set.
    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        on_progress: ProgressCallback,
    ) -> Result<PathBuf>;
}
