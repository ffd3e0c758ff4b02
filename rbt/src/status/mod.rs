//! Backup target status classification and aggregation.
//!
//! Every target found below the report root is classified as OK, ERROR or
//! UNKNOWN, either from its own status plugin or from the completion record
//! in `backup.0`. Records are then grouped into sections and sorted so that
//! problems come first.

pub mod plugin;

use crate::executor::record::CompletionRecord;
use crate::fs::generations::{completion_record_of, ROTATION_TEMP};
use crate::fs::walker::{find_targets, WalkOptions};
use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Presence of this file hides a target from reports.
pub const IGNORE_MARKER: &str = ".rbt-ignore";

/// Free text appended to a target's status line.
pub const COMMENT_FILE: &str = ".rbt-comment";

/// Executable consulted instead of the completion record.
pub const PLUGIN_FILE: &str = "status";

/// Classification of a target. Ordered by severity, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Status {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "UNK")]
    Unknown,
    #[serde(rename = "ERR")]
    Error,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Unknown => "UNK",
            Status::Error => "ERR",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "OK" => Some(Status::Ok),
            "ERR" | "ERROR" => Some(Status::Error),
            "UNK" | "UNKNOWN" => Some(Status::Unknown),
            _ => None,
        }
    }

    /// Plugin exit code contract.
    pub fn from_exit_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            2 => Some(Status::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One classified target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub target: String,
    pub path: PathBuf,
    pub section: String,
    pub status: Status,
    pub last_success: Option<DateTime<FixedOffset>>,
    pub duration: Option<String>,
    pub size: Option<u64>,
    pub comment: Option<String>,
}

/// Classification of a single target directory, before it is placed in a
/// section.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: Status,
    pub last_success: Option<DateTime<FixedOffset>>,
    pub duration: Option<String>,
    pub size: Option<u64>,
    pub comment: Option<String>,
}

impl Classification {
    fn bare(status: Status) -> Self {
        Self {
            status,
            last_success: None,
            duration: None,
            size: None,
            comment: None,
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        let note = note.into();
        self.comment = Some(match self.comment.take() {
            Some(existing) => format!("{}; {}", existing, note),
            None => note,
        });
        self
    }
}

/// Classifies targets relative to a fixed "now".
#[derive(Debug, Clone)]
pub struct Classifier {
    now: DateTime<Local>,
    include_all: bool,
}

impl Classifier {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now,
            include_all: false,
        }
    }

    /// Also classify targets carrying the ignore marker.
    pub fn include_all(mut self, include_all: bool) -> Self {
        self.include_all = include_all;
        self
    }

    /// Classify `target`; `None` when the target is ignored.
    pub fn classify(&self, target: &Path) -> Option<Classification> {
        if !self.include_all && target.join(IGNORE_MARKER).exists() {
            debug!("Ignoring {}", target.display());
            return None;
        }

        let plugin_path = target.join(PLUGIN_FILE);
        let mut classification = if is_executable(&plugin_path) {
            let report = plugin::run(&plugin_path, self.now.fixed_offset());
            Classification {
                status: report.status,
                last_success: report.timestamp,
                duration: report.duration,
                size: report.size,
                comment: report.comment,
            }
        } else {
            self.classify_record(target)
        };

        if let Some(comment) = read_comment(target) {
            classification = classification.with_note(comment);
        }
        Some(classification)
    }

    fn classify_record(&self, target: &Path) -> Classification {
        let orphan = target.join(ROTATION_TEMP);
        let record = CompletionRecord::read(&completion_record_of(target));

        let mut classification = match record {
            Ok(None) => Classification::bare(Status::Unknown),
            Ok(Some(record)) => {
                let day = record.timestamp.with_timezone(&Local).date_naive();
                let status = if day == self.now.date_naive() {
                    Status::Ok
                } else {
                    Status::Error
                };
                Classification {
                    status,
                    last_success: Some(record.timestamp),
                    duration: Some(record.duration_text()),
                    size: record.size,
                    comment: None,
                }
            }
            Err(e) => {
                warn!("Unreadable completion record in {}: {}", target.display(), e);
                Classification::bare(Status::Error)
                    .with_note(format!("unreadable completion record: {}", e))
            }
        };

        if orphan.exists() {
            classification.status = Status::Error;
            classification = classification
                .with_note(format!("interrupted rotation ({} present)", ROTATION_TEMP));
        }
        classification
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn read_comment(target: &Path) -> Option<String> {
    let content = fs::read_to_string(target.join(COMMENT_FILE)).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Grouped, sorted records plus the set of labels seen.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub sections: BTreeMap<String, Vec<StatusRecord>>,
    pub labels: BTreeSet<Status>,
}

impl StatusReport {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &StatusRecord> {
        self.sections.values().flatten()
    }

    /// Most severe label first.
    pub fn labels_by_severity(&self) -> Vec<Status> {
        self.labels.iter().rev().copied().collect()
    }
}

/// Group records by section; within a section ERROR, then UNKNOWN, then OK,
/// ties ordered by target name.
pub fn aggregate(records: Vec<StatusRecord>) -> StatusReport {
    let mut report = StatusReport::default();
    for record in records {
        report.labels.insert(record.status);
        report
            .sections
            .entry(record.section.clone())
            .or_default()
            .push(record);
    }
    for records in report.sections.values_mut() {
        records.sort_by(|a, b| {
            (Reverse(a.status), &a.target).cmp(&(Reverse(b.status), &b.target))
        });
    }
    report
}

/// Default section key: the target's parent directory relative to `root`,
/// or the root's own name for targets directly below it.
pub fn parent_section(root: &Path) -> impl Fn(&Path) -> String + '_ {
    move |target: &Path| {
        let relative = target
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if relative.is_empty() {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string())
        } else {
            relative
        }
    }
}

/// Discover, classify and aggregate every target below `root`.
pub fn collect<F>(
    root: &Path,
    options: &WalkOptions,
    classifier: &Classifier,
    section_of: F,
) -> StatusReport
where
    F: Fn(&Path) -> String,
{
    let records = find_targets(root, options)
        .into_iter()
        .filter_map(|target| {
            let classification = classifier.classify(&target)?;
            let name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| target.display().to_string());
            Some(StatusRecord {
                target: name,
                section: section_of(&target),
                path: target,
                status: classification.status,
                last_success: classification.last_success,
                duration: classification.duration,
                size: classification.size,
                comment: classification.comment,
            })
        })
        .collect();

    aggregate(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_record(target: &Path, when: DateTime<Local>) {
        fs::create_dir_all(target.join("backup.0")).unwrap();
        CompletionRecord::new("t", when.fixed_offset(), 42.0, Some(7))
            .write(&completion_record_of(target))
            .unwrap();
    }

    fn record(target: &str, section: &str, status: Status) -> StatusRecord {
        StatusRecord {
            target: target.to_string(),
            path: PathBuf::from(target),
            section: section.to_string(),
            status,
            last_success: None,
            duration: None,
            size: None,
            comment: None,
        }
    }

    #[test]
    fn test_record_dated_today_is_ok() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        write_record(dir.path(), now);

        let c = Classifier::new(now).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Ok);
        assert_eq!(c.duration.as_deref(), Some("42"));
        assert_eq!(c.size, Some(7));
    }

    #[test]
    fn test_stale_record_is_error() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        write_record(dir.path(), now - Duration::days(1));

        let c = Classifier::new(now).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Error);
        assert!(c.last_success.is_some());
    }

    #[test]
    fn test_missing_record_is_unknown() {
        let dir = TempDir::new().unwrap();
        let c = Classifier::new(Local::now()).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Unknown);
        assert_eq!(c.last_success, None);
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("backup.0")).unwrap();
        fs::write(completion_record_of(dir.path()), "[not, a, record]").unwrap();

        let c = Classifier::new(Local::now()).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Error);
        assert!(c.comment.unwrap().contains("unreadable completion record"));
    }

    #[test]
    fn test_interrupted_rotation_is_not_unknown() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(ROTATION_TEMP)).unwrap();

        let c = Classifier::new(Local::now()).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Error);
        assert!(c.comment.unwrap().contains("interrupted rotation"));
    }

    #[test]
    fn test_ignore_marker() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(IGNORE_MARKER), "").unwrap();

        assert!(Classifier::new(Local::now()).classify(dir.path()).is_none());
        let c = Classifier::new(Local::now())
            .include_all(true)
            .classify(dir.path())
            .unwrap();
        assert_eq!(c.status, Status::Unknown);
    }

    #[test]
    fn test_sidecar_comment_is_attached() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        write_record(dir.path(), now);
        fs::write(dir.path().join(COMMENT_FILE), "  decommissioned in May \n").unwrap();

        let c = Classifier::new(now).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Ok);
        assert_eq!(c.comment.as_deref(), Some("decommissioned in May"));
    }

    #[test]
    fn test_plugin_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let now = Local::now();
        write_record(dir.path(), now);
        let plugin_path = dir.path().join(PLUGIN_FILE);
        fs::write(
            &plugin_path,
            "#!/bin/sh\necho 'ERR:iso:2024-01-01T00:00:00Z:12:5:disk full'\nexit 1\n",
        )
        .unwrap();
        fs::set_permissions(&plugin_path, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(dir.path().join(COMMENT_FILE), "ticket 42").unwrap();

        let c = Classifier::new(now).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Error);
        assert_eq!(c.duration.as_deref(), Some("12"));
        assert_eq!(c.comment.as_deref(), Some("disk full; ticket 42"));
    }

    #[test]
    fn test_non_executable_plugin_is_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PLUGIN_FILE), "echo OK").unwrap();
        fs::set_permissions(
            dir.path().join(PLUGIN_FILE),
            fs::Permissions::from_mode(0o644),
        )
        .unwrap();

        let c = Classifier::new(Local::now()).classify(dir.path()).unwrap();
        assert_eq!(c.status, Status::Unknown);
    }

    #[test]
    fn test_aggregate_sorts_problems_first() {
        let report = aggregate(vec![
            record("a-ok", "servers", Status::Ok),
            record("b-err", "servers", Status::Error),
            record("c-unk", "servers", Status::Unknown),
            record("a-err", "servers", Status::Error),
            record("db", "databases", Status::Ok),
        ]);

        let servers: Vec<&str> = report.sections["servers"]
            .iter()
            .map(|r| r.target.as_str())
            .collect();
        assert_eq!(servers, vec!["a-err", "b-err", "c-unk", "a-ok"]);
        assert_eq!(report.sections.keys().collect::<Vec<_>>(), vec!["databases", "servers"]);

        assert_eq!(
            report.labels_by_severity(),
            vec![Status::Error, Status::Unknown, Status::Ok]
        );
    }

    #[test]
    fn test_ok_records_follow_all_problems() {
        let statuses = [
            Status::Ok,
            Status::Error,
            Status::Ok,
            Status::Unknown,
            Status::Ok,
            Status::Error,
        ];
        let records = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| record(&format!("t{}", i), "s", *s))
            .collect();
        let report = aggregate(records);

        let section = &report.sections["s"];
        let first_ok = section.iter().position(|r| r.status == Status::Ok).unwrap();
        assert!(section[..first_ok].iter().all(|r| r.status != Status::Ok));
        assert!(section[first_ok..].iter().all(|r| r.status == Status::Ok));
    }

    #[test]
    fn test_collect_end_to_end() {
        let root = TempDir::new().unwrap();
        let now = Local::now();

        let web1 = root.path().join("servers/web1");
        write_record(&web1, now);
        let web2 = root.path().join("servers/web2");
        write_record(&web2, now - Duration::days(3));
        let db1 = root.path().join("databases/db1");
        fs::create_dir_all(db1.join("backup.0")).unwrap();
        let old = root.path().join("servers/old");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join(IGNORE_MARKER), "").unwrap();

        let report = collect(
            root.path(),
            &WalkOptions::default(),
            &Classifier::new(now),
            parent_section(root.path()),
        );

        let servers: Vec<(&str, Status)> = report.sections["servers"]
            .iter()
            .map(|r| (r.target.as_str(), r.status))
            .collect();
        assert_eq!(servers, vec![("web2", Status::Error), ("web1", Status::Ok)]);
        assert_eq!(report.sections["databases"][0].status, Status::Unknown);
        assert_eq!(report.labels.len(), 3);
    }

    #[test]
    fn test_parent_section_for_flat_layout() {
        let root = PathBuf::from("/backup");
        let section = parent_section(&root);
        assert_eq!(section(Path::new("/backup/web1")), "backup");
        assert_eq!(section(Path::new("/backup/servers/web1")), "servers");
    }
}
