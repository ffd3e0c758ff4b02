//! Completion record written into `backup.0` after a successful rotation.
//!
//! Serialized as a YAML mapping at `backup.0/completed`:
//!
//! ```yaml
//! name: db1
//! timestamp: 2024-05-01T03:12:44.123456+02:00
//! duration: 812.4
//! size: 104857600
//! ```
//!
//! Revision 1 records carry `name`, `timestamp` and `duration`; revision 2
//! adds `size` (bytes transferred). JSON objects decode as well.

use crate::utils::{RbtError, Result};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRevision {
    /// No byte count.
    V1,
    /// With byte count.
    V2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub name: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Elapsed seconds for sync plus rotation.
    pub duration: f64,
    pub size: Option<u64>,
}

/// On-disk shape; every revision decodes into it.
#[derive(Debug, Serialize, Deserialize)]
struct RawRecord {
    name: String,
    timestamp: String,
    duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

impl CompletionRecord {
    pub fn new(
        name: impl Into<String>,
        timestamp: DateTime<FixedOffset>,
        duration: f64,
        size: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            timestamp,
            duration,
            size,
        }
    }

    pub fn revision(&self) -> RecordRevision {
        match self.size {
            Some(_) => RecordRevision::V2,
            None => RecordRevision::V1,
        }
    }

    /// Whole seconds, as shown in status reports.
    pub fn duration_text(&self) -> String {
        format!("{:.0}", self.duration.max(0.0))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawRecord = serde_yaml_ng::from_str(content)?;
        let timestamp = parse_timestamp(&raw.timestamp).ok_or_else(|| {
            RbtError::Config(format!("invalid completion timestamp `{}`", raw.timestamp))
        })?;

        Ok(Self {
            name: raw.name,
            timestamp,
            duration: raw.duration,
            size: raw.size,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        let raw = RawRecord {
            name: self.name.clone(),
            timestamp: self.timestamp.to_rfc3339(),
            duration: self.duration,
            size: self.size,
        };
        Ok(serde_yaml_ng::to_string(&raw)?)
    }

    /// Read a record; `Ok(None)` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the record next to `path` first, then rename it into place.
    pub fn write(&self, path: &Path) -> Result<()> {
        let partial = path.with_extension("partial");
        fs::write(&partial, self.to_yaml()?)?;
        fs::rename(&partial, path)?;
        Ok(())
    }
}

/// Parse an ISO-8601 timestamp. Timestamps without an offset are taken as
/// local time.
pub fn parse_timestamp(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts);
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.fixed_offset())
}
