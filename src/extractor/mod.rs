pub mod models;
pub mod profile;
pub mod traits;
pub mod ytdlp;

pub use models::{FetchOptions, MediaEntry, MediaProbe, MediaProgress, ProgressCallback};
pub use profile::{is_media_url, ProfileOptions, SiteProfile};
pub use traits::MediaExtractor;
pub use ytdlp::YtDlp;
