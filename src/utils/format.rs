//! Human-readable sizes, speeds and durations for status reports

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count, e.g. `1536` -> `"1.50 KB"`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "0.00 B/s".to_string();
    }
    format!("{}/s", format_size(bytes_per_sec as u64))
}

/// Format an ETA in seconds as `HH:MM:SS`, or `"unknown"`.
pub fn format_eta(eta_secs: Option<u64>) -> String {
    match eta_secs {
        Some(secs) => format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn test_format_size_caps_at_terabytes() {
        assert_eq!(format_size(2048 * 1024 * 1024 * 1024 * 1024), "2048.00 TB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(2048.0), "2.00 KB/s");
        assert_eq!(format_speed(0.0), "0.00 B/s");
        assert_eq!(format_speed(f64::NAN), "0.00 B/s");
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(Some(0)), "00:00:00");
        assert_eq!(format_eta(Some(3725)), "01:02:05");
        assert_eq!(format_eta(None), "unknown");
    }
}
