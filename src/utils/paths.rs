//! Platform directory resolution
//!
//! All defaults resolve to absolute paths. A server started from a service
//! manager or desktop launcher usually has "/" as its working directory, so
//! relative defaults would land in the wrong place.

use std::path::PathBuf;
use tracing::{debug, warn};

const APP_DIR_NAME: &str = "miaobox";

/// Directory for application data (history file, log file).
///
/// Creates the directory if it doesn't exist.
pub fn get_app_data_dir() -> PathBuf {
    let dir = dirs::data_dir()
        .map(|data| data.join(APP_DIR_NAME))
        .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{}", APP_DIR_NAME))))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR_NAME));

    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!("Failed to create app data directory {:?}: {}", dir, e);
    }

    debug!("App data directory: {:?}", dir);
    dir
}

/// Default history file: `<app data>/download_history.json`
pub fn get_history_path() -> PathBuf {
    get_app_data_dir().join("download_history.json")
}

/// Default log file: `<app data>/miaobox.log`
pub fn get_log_path() -> PathBuf {
    get_app_data_dir().join("miaobox.log")
}

/// The platform Downloads directory, falling back to `~/Downloads`.
pub fn get_downloads_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| {
            warn!("Could not determine Downloads directory, using temp dir");
            std::env::temp_dir()
        })
}
