//! Backup job model.
//!
//! A [`Job`] is built once per run from a resolved job file entry (see
//! [`loader`]) and never changes afterwards.

pub mod loader;

use crate::fs::generations::GenerationLayout;
use crate::utils::{RbtError, Result};
use serde::Deserialize;
use serde_yaml_ng::Value;
use std::path::PathBuf;

/// Job name that selects local sources instead of `user@host:path`.
pub const LOCALHOST: &str = "localhost";

/// One backup job: what to copy, where to, and how many generations to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Target identifier, also the remote host name
    pub name: String,
    pub user: Option<String>,
    pub files: Vec<String>,
    pub exclude: Vec<String>,
    /// Root directory holding `backup.0 .. backup.N`
    pub target: PathBuf,
    /// Retention depth `N`
    pub backups: usize,
    pub enabled: bool,
    pub fakesuper: bool,
    pub chown: Option<String>,
    pub bwlimit: Option<String>,
    /// Wall-clock limit for the rsync run, in seconds
    pub timeout: Option<u64>,
}

/// Raw job entry after template merge and interpolation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct JobConfig {
    name: Option<String>,
    user: Option<String>,
    #[allow(dead_code)]
    template: Option<String>,
    target: Option<PathBuf>,
    backups: Option<i64>,
    enabled: Option<bool>,
    files: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    fakesuper: Option<bool>,
    chown: Option<String>,
    /// Accepted for compatibility with older job files; not used.
    #[allow(dead_code)]
    mysql: Option<Value>,
    bwlimit: Option<Value>,
    timeout: Option<u64>,
}

impl TryFrom<JobConfig> for Job {
    type Error = RbtError;

    fn try_from(config: JobConfig) -> Result<Self> {
        let name = config
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| RbtError::Config("missing `name`".to_string()))?;
        let target = config
            .target
            .ok_or_else(|| RbtError::Config(format!("[{}] missing `target`", name)))?;
        let backups = config
            .backups
            .ok_or_else(|| RbtError::Config(format!("[{}] missing `backups`", name)))?;
        if backups < 1 {
            return Err(RbtError::Config(format!(
                "[{}] `backups` must be at least 1, got {}",
                name, backups
            )));
        }

        let bwlimit = match config.bwlimit {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => {
                return Err(RbtError::Config(format!(
                    "[{}] invalid `bwlimit`: {:?}",
                    name, other
                )))
            }
        };

        Ok(Job {
            name,
            user: config.user.filter(|u| !u.is_empty()),
            files: config.files.unwrap_or_default(),
            exclude: config.exclude.unwrap_or_default(),
            target,
            backups: backups as usize,
            enabled: config.enabled.unwrap_or(true),
            fakesuper: config.fakesuper.unwrap_or(false),
            chown: config.chown.filter(|c| !c.is_empty()),
            bwlimit,
            timeout: config.timeout.filter(|t| *t > 0),
        })
    }
}

impl Job {
    /// Generation directory layout under the job's target.
    pub fn layout(&self) -> GenerationLayout {
        GenerationLayout::new(&self.target, self.backups)
    }

    /// Whether sources are read from the local filesystem.
    pub fn is_local(&self) -> bool {
        self.name == LOCALHOST
    }

    /// Remote login: the configured user or the invoking OS user.
    pub fn username(&self) -> String {
        if let Some(user) = &self.user {
            return user.clone();
        }
        nix::unistd::User::from_uid(nix::unistd::getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "root".to_string())
    }

    /// Source arguments as handed to rsync.
    pub fn sources(&self) -> Vec<String> {
        if self.is_local() {
            return self.files.clone();
        }
        let user = self.username();
        self.files
            .iter()
            .map(|path| format!("{}@{}:{}", user, self.name, path))
            .collect()
    }
}
