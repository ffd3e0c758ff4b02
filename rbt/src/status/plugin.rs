//! Status plugin protocol.
//!
//! A target may ship an executable `status` file. It is run without
//! arguments from inside the target directory, must exit with 0 (OK),
//! 1 (ERROR) or 2 (UNKNOWN) and print one line:
//!
//! ```text
//! status:format:timestamp:duration[:size[:comment]]
//! ```
//!
//! `format` is `iso` or `epoch`. ISO timestamps contain colons themselves,
//! so the shortest colon-joined prefix that parses as a timestamp is taken.
//! The comment is the remainder of the line and may contain colons.

use super::Status;
use crate::executor::record::parse_timestamp;
use chrono::{DateTime, FixedOffset};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// What a plugin reported, already downgraded to ERROR where it misbehaved.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginReport {
    pub status: Status,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub duration: Option<String>,
    pub size: Option<u64>,
    pub comment: Option<String>,
}

impl PluginReport {
    fn failure(now: DateTime<FixedOffset>, comment: String) -> Self {
        Self {
            status: Status::Error,
            timestamp: Some(now),
            duration: None,
            size: None,
            comment: Some(comment),
        }
    }
}

/// Run the plugin at `path` and decode its output. Never fails: spawn
/// errors, foreign exit codes and garbage output become ERROR reports.
pub fn run(path: &Path, now: DateTime<FixedOffset>) -> PluginReport {
    let mut command = Command::new(path);
    if let Some(dir) = path.parent() {
        command.current_dir(dir);
    }

    let output = match command
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            warn!("Failed to run status plugin {}: {}", path.display(), e);
            return PluginReport::failure(
                now,
                format!("status plugin failed to start: {}", e),
            );
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    debug!("Status plugin {} said {:?}", path.display(), line);

    let code = output.status.code();
    match code.and_then(Status::from_exit_code) {
        Some(exit_status) => parse_line(line, exit_status, now),
        None => {
            let code = code.map_or_else(|| "a signal".to_string(), |c| c.to_string());
            warn!("Status plugin {} exited with {}", path.display(), code);
            let mut report =
                PluginReport::failure(now, format!("status plugin exited with {}", code));
            if !line.is_empty() {
                report.comment = Some(format!(
                    "status plugin exited with {}: {}",
                    code,
                    line.trim()
                ));
            }
            report
        }
    }
}

/// Decode one plugin line. `exit_status` decides when the line's own status
/// field is not recognised.
pub fn parse_line(line: &str, exit_status: Status, now: DateTime<FixedOffset>) -> PluginReport {
    let line = line.trim();
    let mut head = line.splitn(3, ':');
    let (Some(status), Some(format), Some(rest)) = (head.next(), head.next(), head.next()) else {
        return PluginReport::failure(
            now,
            format!("malformed status plugin output: {:?}", line),
        );
    };

    let mut status = Status::from_label(status).unwrap_or(exit_status);
    let mut notes = Vec::new();

    let (timestamp, fields) = match format {
        "iso" => match split_iso(rest) {
            Some((ts, fields)) => (ts, fields),
            None => {
                status = Status::Error;
                notes.push("unparsable timestamp".to_string());
                (now, drop_first(rest))
            }
        },
        "epoch" => {
            let (ts, fields) = rest.split_once(':').unwrap_or((rest, ""));
            match ts.trim().parse::<i64>().ok().and_then(|s| DateTime::from_timestamp(s, 0)) {
                Some(ts) => (ts.fixed_offset(), fields.to_string()),
                None => {
                    status = Status::Error;
                    notes.push("unparsable timestamp".to_string());
                    (now, fields.to_string())
                }
            }
        }
        other => {
            status = Status::Error;
            notes.push(format!("unknown timestamp format `{}`", other));
            let fields = split_iso(rest).map_or_else(|| drop_first(rest), |(_, f)| f);
            (now, fields)
        }
    };

    let mut fields = fields.splitn(3, ':');
    let duration = fields
        .next()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    let size = fields.next().and_then(|s| s.trim().parse::<u64>().ok());
    if let Some(comment) = fields.next().map(str::trim).filter(|c| !c.is_empty()) {
        notes.push(comment.to_string());
    }

    PluginReport {
        status,
        timestamp: Some(timestamp),
        duration,
        size,
        comment: (!notes.is_empty()).then(|| notes.join("; ")),
    }
}

/// Split `timestamp:rest` where the timestamp itself may contain colons.
fn split_iso(rest: &str) -> Option<(DateTime<FixedOffset>, String)> {
    let tokens: Vec<&str> = rest.split(':').collect();
    (1..=tokens.len()).find_map(|k| {
        let ts = parse_timestamp(&tokens[..k].join(":"))?;
        Some((ts, tokens[k..].join(":")))
    })
}

fn drop_first(rest: &str) -> String {
    rest.split_once(':').map(|(_, f)| f.to_string()).unwrap_or_default()
}
