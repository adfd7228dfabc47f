//! Per-site extractor options

use std::path::PathBuf;
use url::Url;

/// Output template handed to the extractor
pub const OUTPUT_TEMPLATE: &str = "%(title)s_%(id)s.%(ext)s";

const DEFAULT_FORMAT: &str = "bestvideo+bestaudio/best";
const BILIBILI_FORMAT: &str = "bestvideo*+bestaudio/best";
const BILIBILI_SORT: &str = "res:2160,res:1440,res:1080,res:720";
const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".m3u8", ".flv", ".mkv", ".webm"];

/// Request-level choices that feed profile resolution
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Maximum video height, e.g. 1080
    pub quality: Option<u32>,
    pub subtitles: bool,
    pub subtitle_langs: Vec<String>,
    pub cookies_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteProfile {
    Generic,
    YouTube {
        max_height: Option<u32>,
        /// Empty when subtitles are off
        subtitle_langs: Vec<String>,
    },
    Bilibili {
        cookies_file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Site {
    YouTube,
    Bilibili,
    Other,
}

fn site_of(url: &str) -> Site {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    else {
        return Site::Other;
    };

    let matches = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));
    if matches("youtube.com") || matches("youtu.be") {
        Site::YouTube
    } else if matches("bilibili.com") || matches("b23.tv") {
        Site::Bilibili
    } else {
        Site::Other
    }
}

impl SiteProfile {
    /// Pick the profile for `url`; resolved once per job
    pub fn resolve(url: &str, options: &ProfileOptions) -> Self {
        match site_of(url) {
            Site::YouTube => SiteProfile::YouTube {
                max_height: options.quality,
                subtitle_langs: if options.subtitles {
                    options.subtitle_langs.clone()
                } else {
                    Vec::new()
                },
            },
            Site::Bilibili => SiteProfile::Bilibili {
                cookies_file: options.cookies_file.clone().filter(|p| p.exists()),
            },
            Site::Other => SiteProfile::Generic,
        }
    }

    /// Format and site arguments for yt-dlp
    pub fn ytdlp_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            SiteProfile::Generic => {
                args.extend(["-f".into(), DEFAULT_FORMAT.into()]);
            }
            SiteProfile::YouTube {
                max_height,
                subtitle_langs,
            } => {
                let format = match max_height {
                    Some(h) => format!(
                        "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/best[height<={h}]"
                    ),
                    None => DEFAULT_FORMAT.to_string(),
                };
                args.extend(["-f".into(), format]);
                if !subtitle_langs.is_empty() {
                    args.extend([
                        "--write-subs".into(),
                        "--sub-langs".into(),
                        subtitle_langs.join(","),
                    ]);
                }
            }
            SiteProfile::Bilibili { cookies_file } => {
                args.extend([
                    "-f".into(),
                    BILIBILI_FORMAT.into(),
                    "-S".into(),
                    BILIBILI_SORT.into(),
                ]);
                if let Some(cookies) = cookies_file {
                    args.extend(["--cookies".into(), cookies.to_string_lossy().into_owned()]);
                }
            }
        }
        args.extend(["--merge-output-format".into(), "mp4".into()]);
        args
    }
}

/// Whether a URL looks like something the media path should handle
pub fn is_media_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if lower.contains("youtube.com/watch?v=")
        || lower.contains("youtu.be/")
        || lower.contains("bilibili.com/video/")
        || lower.contains("b23.tv/")
    {
        return true;
    }

    let path = Url::parse(&lower)
        .map(|u| u.path().to_string())
        .unwrap_or(lower);
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
