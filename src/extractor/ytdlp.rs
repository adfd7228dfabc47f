//! yt-dlp adapter
//!
//! Probing runs `--flat-playlist --dump-single-json`; fetching streams
//! `--newline` progress from both pipes and reads the final path from
//! `--print after_move:filepath`.

use crate::downloader::filename::ensure_within;
use crate::extractor::models::{FetchOptions, MediaEntry, MediaProbe, MediaProgress, ProgressCallback};
use crate::extractor::profile::OUTPUT_TEMPLATE;
use crate::extractor::traits::MediaExtractor;
use crate::utils::error::{LoaderError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Extractor backed by the yt-dlp executable
#[derive(Debug, Clone)]
pub struct YtDlp {
    path: PathBuf,
}

impl YtDlp {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use `configured` if given, otherwise search the usual places.
    pub fn locate(configured: Option<&Path>) -> Result<Self> {
        if let Some(path) = configured {
            if is_executable(path) {
                info!("Using configured yt-dlp: {}", path.display());
                return Ok(Self::new(path));
            }
            warn!("Configured yt-dlp {} is not executable, searching", path.display());
        }

        match find_ytdlp() {
            Some(path) => {
                info!("Found yt-dlp at: {}", path.display());
                Ok(Self::new(path))
            }
            None => Err(LoaderError::YtDlpNotFound),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fetch_args(url: &str, options: &FetchOptions) -> Vec<String> {
        let mut args = options.profile.ytdlp_args();
        args.extend([
            "--newline".to_string(),
            "--progress".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            // --print implies --simulate and --quiet
            "--no-simulate".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--retries".to_string(),
            options.retries.to_string(),
            "--user-agent".to_string(),
            options.user_agent.clone(),
            "-P".to_string(),
            options.save_dir.to_string_lossy().into_owned(),
            "-o".to_string(),
            OUTPUT_TEMPLATE.to_string(),
            url.to_string(),
        ]);
        args
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    fn id(&self) -> &'static str {
        "yt-dlp"
    }

    async fn probe(&self, url: &str) -> Result<MediaProbe> {
        debug!("Probing media URL: {}", url);

        let output = Command::new(&self.path)
            .arg("--flat-playlist")
            .arg("--dump-single-json")
            .arg("--no-warnings")
            .arg(url)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("yt-dlp probe failed: {}", error_msg);
            return Err(LoaderError::Extraction(error_msg));
        }

        parse_probe(url, &output.stdout)
    }

    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
        on_progress: ProgressCallback,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&options.save_dir).await?;
        let args = Self::fetch_args(url, options);
        debug!(url, ?args, "Spawning yt-dlp");

        let mut child = Command::new(&self.path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let destinations: Destinations = Arc::default();
        let stdout_task = child.stdout.take().map(|pipe| {
            tokio::spawn(read_output(pipe, on_progress.clone(), Arc::clone(&destinations)))
        });
        let stderr_task = child.stderr.take().map(|pipe| {
            tokio::spawn(read_output(pipe, on_progress.clone(), Arc::clone(&destinations)))
        });

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = options.cancel.cancelled() => {
                info!(url, "Cancelling yt-dlp");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill yt-dlp: {}", e);
                }
                let written = destinations.lock().clone();
                let partial = remove_partials(&options.save_dir, &written).await;
                return Err(LoaderError::Cancelled { partial });
            }
        };

        let stdout = join_reader(stdout_task).await;
        let stderr = join_reader(stderr_task).await;

        if !status.success() {
            let message = stderr
                .errors
                .last()
                .cloned()
                .unwrap_or_else(|| format!("yt-dlp exited with {}", status));
            error!(url, "yt-dlp download failed: {}", message);
            return Err(LoaderError::Extraction(message));
        }

        stdout
            .printed
            .into_iter()
            .rev()
            .map(PathBuf::from)
            .find(|p| p.is_absolute())
            .ok_or_else(|| LoaderError::Extraction("yt-dlp did not report an output file".into()))
    }
}

/// What a reader task saw on one pipe
#[derive(Debug, Default)]
struct PipeOutput {
    /// Lines that are neither progress nor log prefixes
    printed: Vec<String>,
    errors: Vec<String>,
}

/// Output files yt-dlp announced, shared between the pipe readers
type Destinations = Arc<Mutex<Vec<PathBuf>>>;

async fn read_output<R>(
    pipe: R,
    on_progress: ProgressCallback,
    destinations: Destinations,
) -> PipeOutput
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    let mut output = PipeOutput::default();

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(path) = parse_destination(&line) {
            debug!("yt-dlp writing {}", path.display());
            destinations.lock().push(path);
        } else if let Some(progress) = parse_progress(&line) {
            on_progress(progress);
        } else if line.starts_with("ERROR:") {
            output.errors.push(line);
        } else if !line.starts_with('[') && !line.trim().is_empty() {
            output.printed.push(line.trim().to_string());
        }
    }

    output
}

async fn join_reader(task: Option<tokio::task::JoinHandle<PipeOutput>>) -> PipeOutput {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => PipeOutput::default(),
    }
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    #[serde(rename = "_type")]
    kind: Option<String>,
    id: Option<String>,
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    #[serde(default)]
    entries: Vec<RawInfo>,
}

/// Output path from `[download] Destination: ...` or `[Merger] Merging formats into "..."`
pub fn parse_destination(line: &str) -> Option<PathBuf> {
    let line = line.trim();
    let raw = if let Some(rest) = line.strip_prefix("[download] Destination:") {
        rest.trim()
    } else {
        line.strip_prefix("[Merger] Merging formats into")?
            .trim()
            .trim_matches('"')
    };
    (!raw.is_empty()).then(|| PathBuf::from(raw))
}

/// Delete announced outputs and their `.part`/`.ytdl` siblings inside `save_dir`.
///
/// Returns the last announced path, which is what the job was producing.
pub async fn remove_partials(save_dir: &Path, written: &[PathBuf]) -> Option<PathBuf> {
    for path in written {
        let path = if path.is_relative() {
            save_dir.join(path)
        } else {
            path.clone()
        };
        let Ok(path) = ensure_within(save_dir, &path) else {
            continue;
        };

        let mut candidates = vec![path.clone()];
        for suffix in [".part", ".ytdl"] {
            let mut sibling = path.clone().into_os_string();
            sibling.push(suffix);
            candidates.push(PathBuf::from(sibling));
        }
        for candidate in candidates {
            match tokio::fs::remove_file(&candidate).await {
                Ok(()) => debug!("Removed partial output {}", candidate.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", candidate.display(), e),
            }
        }
    }

    written.last().map(|path| {
        if path.is_relative() {
            save_dir.join(path)
        } else {
            path.clone()
        }
    })
}

/// Turn yt-dlp's single-JSON dump into a probe result
pub fn parse_probe(url: &str, json: &[u8]) -> Result<MediaProbe> {
    let info: RawInfo = serde_json::from_slice(json)?;

    if info.kind.as_deref() == Some("playlist") {
        let entries = info
            .entries
            .into_iter()
            .filter_map(|entry| {
                let entry_url = entry.webpage_url.or(entry.url)?;
                Some(MediaEntry {
                    url: entry_url,
                    id: entry.id,
                    title: entry.title,
                })
            })
            .collect();

        return Ok(MediaProbe {
            is_playlist: true,
            title: info.title,
            entries,
        });
    }

    Ok(MediaProbe {
        is_playlist: false,
        title: info.title.clone(),
        entries: vec![MediaEntry {
            url: url.to_string(),
            id: info.id,
            title: info.title,
        }],
    })
}

/// Parse a `[download]` progress line.
///
/// Expected format: `[download]  42.5% of ~ 150.00MiB at  5.20MiB/s ETA 00:15`
pub fn parse_progress(line: &str) -> Option<MediaProgress> {
    let rest = line.trim_start().strip_prefix("[download]")?.trim_start();
    let (pct, rest) = rest.split_once('%')?;
    let percentage: f64 = pct.trim().parse().ok()?;

    let total_bytes = rest
        .split_once(" of ")
        .and_then(|(_, after)| {
            after
                .trim_start()
                .trim_start_matches('~')
                .split_whitespace()
                .next()
        })
        .and_then(parse_size)
        .map(|bytes| bytes as u64)
        .unwrap_or(0);

    let speed_bps = rest
        .split_once(" at ")
        .and_then(|(_, after)| after.split_whitespace().next())
        .and_then(|token| token.strip_suffix("/s"))
        .and_then(parse_size)
        .unwrap_or(0.0);

    let downloaded_bytes = if total_bytes > 0 {
        (percentage / 100.0 * total_bytes as f64) as u64
    } else {
        0
    };

    Some(MediaProgress {
        downloaded_bytes,
        total_bytes,
        percentage,
        speed_bps,
    })
}

/// `10.50MiB` -> bytes
fn parse_size(token: &str) -> Option<f64> {
    let split = token
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(token.len());
    let (number, unit) = token.split_at(split);
    let value: f64 = number.parse().ok()?;

    let multiplier = match unit.trim() {
        "" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "KB" | "kB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        _ => return None,
    };
    Some(value * multiplier)
}

// ============================================================
// yt-dlp Detection Functions
// ============================================================

/// Find yt-dlp binary with priority:
/// 1. Next to the executable
/// 2. System PATH
/// 3. Common installation paths
pub fn find_ytdlp() -> Option<PathBuf> {
    if let Some(local) = find_next_to_exe() {
        return Some(local);
    }

    if let Ok(path) = which::which("yt-dlp") {
        return Some(path);
    }

    find_in_common_paths()
}

fn find_next_to_exe() -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_dir = exe_path.parent()?;
    let candidate = exe_dir.join(if cfg!(windows) { "yt-dlp.exe" } else { "yt-dlp" });
    is_executable(&candidate).then_some(candidate)
}

fn find_in_common_paths() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/opt/homebrew/bin/yt-dlp"),
        PathBuf::from("/usr/local/bin/yt-dlp"),
        PathBuf::from("/usr/bin/yt-dlp"),
    ];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".local").join("bin").join("yt-dlp"));
    }

    candidates.into_iter().find(|p| is_executable(p))
}

/// Check if a file is executable
fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

// ============================================================
// Tests
// ============================================================
