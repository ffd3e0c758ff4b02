//! Human-readable cell values.

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format a duration given in whole seconds. Anything that is not a number of
/// seconds (plugins may report free text) is returned unchanged.
pub fn format_duration(duration: &str) -> String {
    let Ok(seconds) = duration.trim().parse::<u64>() else {
        return duration.to_string();
    };

    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(104_857_600), "100.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration("42"), "42s");
        assert_eq!(format_duration("812"), "13m 32s");
        assert_eq!(format_duration("7260"), "2h 1m");
        assert_eq!(format_duration("about an hour"), "about an hour");
    }
}
