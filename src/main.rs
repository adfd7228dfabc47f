//! miaobox - self-hosted download manager
//!
//! Serves a small local web API that downloads files with parallel range
//! requests and hands media URLs to yt-dlp.

use anyhow::{Context, Result};
use clap::Parser;
use miaobox::api::{self, AppState};
use miaobox::controller::{ControllerConfig, DownloadController, JobOutcome, StartOptions};
use miaobox::downloader::DownloadEngine;
use miaobox::extractor::{MediaExtractor, YtDlp};
use miaobox::history::HistoryStore;
use miaobox::utils::{format_eta, format_size, format_speed, AppSettings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "miaobox", version, about = "Self-hosted download manager")]
struct Args {
    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to serve the API on, e.g. 127.0.0.1:5000
    #[arg(short, long)]
    listen: Option<String>,

    /// Directory downloads are saved into
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Download one URL without starting the server
    #[arg(long)]
    test_download: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = AppSettings::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        settings.listen_addr = listen;
    }
    if let Some(save_path) = args.save_path {
        settings.save_path = save_path;
    }
    if let Some(log_file) = args.log_file {
        settings.log_file = Some(log_file);
    }

    let _log_guard = init_logging(settings.log_file.as_deref())?;
    info!("miaobox {} starting", env!("CARGO_PKG_VERSION"));

    let controller = build_controller(&settings).await?;

    if let Some(url) = args.test_download {
        return test_download_cli(controller, &url).await;
    }

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen_addr))?;
    info!("Serving API on http://{}", settings.listen_addr);
    info!("Saving downloads to {}", settings.save_path.display());

    axum::serve(listener, api::router(AppState::new(controller)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    info!("Shut down");
    Ok(())
}

/// Console logging always; file logging when a path is configured.
///
/// The returned guard flushes the file writer and must outlive the program.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn build_controller(settings: &AppSettings) -> Result<DownloadController> {
    let history = HistoryStore::open(&settings.history_file)
        .await
        .with_context(|| {
            format!(
                "Failed to open history file {}",
                settings.history_file.display()
            )
        })?;

    let extractor: Option<Arc<dyn MediaExtractor>> =
        match YtDlp::locate(settings.ytdlp_path.as_deref()) {
            Ok(ytdlp) => Some(Arc::new(ytdlp)),
            Err(e) => {
                warn!("{}; media downloads are disabled", e);
                warn!("Install it with `pip install yt-dlp` or set `ytdlp_path`");
                None
            }
        };

    let engine = DownloadEngine::new(settings.download_config())
        .context("Failed to build HTTP client")?;

    Ok(DownloadController::new(
        engine,
        Arc::new(history),
        extractor,
        ControllerConfig::from_settings(settings),
    ))
}

/// Headless download that prints progress until the job ends
async fn test_download_cli(controller: DownloadController, url: &str) -> Result<()> {
    println!("Testing download: {}", url);

    let started = controller
        .start(url, None, StartOptions::default())
        .await
        .context("Failed to start download")?;
    println!("Job {} ({})", started.job_id, started.file_name);

    let reporter = {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                ticker.tick().await;
                let status = controller.status();
                let progress = &status.progress;
                println!(
                    "[{:?}] {:.1}% {} / {} at {}, ETA {}",
                    status.state,
                    progress.percentage,
                    format_size(progress.bytes_downloaded),
                    format_size(progress.bytes_total),
                    format_speed(progress.speed_bps),
                    format_eta(progress.eta_seconds),
                );
                if status.state.is_terminal() {
                    break;
                }
            }
        })
    };

    let outcome = controller.wait().await;
    reporter.abort();

    match outcome {
        Some(JobOutcome::Completed {
            file_name,
            path,
            bytes,
        }) => {
            println!(
                "Download completed: {} ({}) at {}",
                file_name,
                format_size(bytes),
                path.display()
            );
            Ok(())
        }
        Some(JobOutcome::Cancelled { bytes }) => {
            println!("Download cancelled after {}", format_size(bytes));
            Ok(())
        }
        Some(JobOutcome::Failed { kind, message }) => {
            anyhow::bail!("Download failed ({}): {}", kind, message)
        }
        None => anyhow::bail!("Download ended without an outcome"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
