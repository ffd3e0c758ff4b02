//! Runtime settings for rbt.
//!
//! Layered from built-in defaults, an optional TOML file and `RBT_`-prefixed
//! environment variables (`RBT_SYNC__RSYNC=/opt/bin/rsync`). Command-line
//! flags are applied on top by the binary.

use crate::utils::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file consulted when `--settings` is not given.
pub const DEFAULT_SETTINGS_FILE: &str = "/etc/rbt/rbt.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub jobs: JobsSettings,
    #[serde(default)]
    pub report: ReportSettings,
    #[serde(default)]
    pub mail: MailSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Path to the rsync binary
    #[serde(default = "default_rsync")]
    pub rsync: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsSettings {
    /// Directory searched for job files given by bare name
    #[serde(default = "default_prefix")]
    pub prefix: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSettings {
    /// Directory scanned for backup targets
    #[serde(default = "default_report_root")]
    pub root: PathBuf,

    /// How deep below the root targets are searched for
    #[serde(default = "default_depth")]
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSettings {
    #[serde(default = "default_mail_from")]
    pub from: String,

    /// Default recipients for `rbt status --mail`
    #[serde(default)]
    pub to: Vec<String>,

    #[serde(default = "default_sendmail")]
    pub sendmail: PathBuf,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_rsync() -> PathBuf {
    PathBuf::from("/usr/bin/rsync")
}

fn default_prefix() -> PathBuf {
    PathBuf::from("/etc/rbt")
}

fn default_report_root() -> PathBuf {
    PathBuf::from("/backup")
}

fn default_depth() -> usize {
    3
}

fn default_mail_from() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("rbt@{}", host)
}

fn default_sendmail() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            rsync: default_rsync(),
        }
    }
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            root: default_report_root(),
            depth: default_depth(),
        }
    }
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
            to: Vec::new(),
            sendmail: default_sendmail(),
        }
    }
}

impl Settings {
    /// Load settings from `path` (required) or the default file (optional),
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::from(Path::new(DEFAULT_SETTINGS_FILE)).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("RBT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Parse settings from a TOML document, without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }
}
