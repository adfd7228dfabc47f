//! Utility modules for error handling, configuration and formatting

pub mod config;
pub mod error;
pub mod format;
pub mod paths;

// Re-export for convenience
pub use config::AppSettings;
pub use error::{LoaderError, Result};
pub use format::{format_eta, format_size, format_speed};
