//! Parsing of rsync `--stats` output.

/// Line prefix carrying the number of bytes actually transferred.
const TRANSFERRED_PREFIX: &str = "Total transferred file size:";

/// Extract the transferred byte count from rsync's `--stats` summary.
///
/// rsync prints `Total transferred file size: 1,234,567 bytes`; digit
/// grouping characters are ignored.
pub fn transferred_bytes(stdout: &str) -> Option<u64> {
    stdout.lines().find_map(|line| {
        let value = line.trim().strip_prefix(TRANSFERRED_PREFIX)?;
        let number = value.trim().split_whitespace().next()?;
        let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    })
}
