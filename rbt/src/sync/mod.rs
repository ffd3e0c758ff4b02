//! rsync invocation.
//!
//! The argument vector asks rsync to copy every configured source into the
//! staging generation, hard-linking files unchanged since `backup.0` through
//! `--link-dest`. Exit code 0 and 24 (source files vanished mid-transfer)
//! count as success.

pub mod stats;

use crate::fs::generations::GenerationLayout;
use crate::job::Job;
use crate::utils::{RbtError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// rsync: "partial transfer due to vanished source files".
pub const VANISHED_FILES_EXIT: i32 = 24;

/// Flags always passed to rsync. `--stats` feeds [`stats::transferred_bytes`].
const BASE_FLAGS: [&str; 3] = ["-aRH", "--delete", "--stats"];

/// Whether an rsync exit code means the staging generation is usable.
pub fn is_success(code: i32) -> bool {
    code == 0 || code == VANISHED_FILES_EXIT
}

/// Outcome of a successful rsync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub exit_code: i32,
    pub transferred_bytes: Option<u64>,
}

/// A fully built rsync command line for one job.
#[derive(Debug, Clone)]
pub struct SyncCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl SyncCommand {
    pub fn for_job(rsync: &Path, job: &Job) -> Self {
        let layout = job.layout();
        let mut args: Vec<String> = BASE_FLAGS.iter().map(|s| s.to_string()).collect();

        if job.fakesuper {
            args.push("--fake-super".to_string());
        }
        if let Some(chown) = &job.chown {
            args.push(format!("--chown={}", chown));
        }
        if let Some(bwlimit) = &job.bwlimit {
            args.push(format!("--bwlimit={}", bwlimit));
        }
        args.push(format!(
            "--link-dest={}",
            GenerationLayout::files(&layout.latest()).display()
        ));
        args.extend(job.sources());
        args.extend(job.exclude.iter().map(|e| format!("--exclude={}", e)));
        args.push(
            GenerationLayout::files(&layout.staging())
                .display()
                .to_string(),
        );

        Self {
            program: rsync.to_path_buf(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Command line for logging.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run rsync to completion.
    ///
    /// The child is killed when `timeout` elapses or `cancel` fires. Any exit
    /// code outside [`is_success`] is returned as [`RbtError::SyncFailed`].
    pub async fn run(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        debug!("Starting command: {}", self.display());

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let wait = child.wait_with_output();
        let bounded = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, wait)
                    .await
                    .map_err(|_| RbtError::SyncTimeout(limit.as_secs())),
                None => Ok(wait.await),
            }
        };

        let output = tokio::select! {
            result = bounded => result??,
            _ = cancel.cancelled() => return Err(RbtError::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let code = output.status.code().ok_or(RbtError::SyncKilled)?;
        if !is_success(code) {
            return Err(RbtError::SyncFailed(code));
        }

        Ok(SyncOutcome {
            exit_code: code,
            transferred_bytes: stats::transferred_bytes(&stdout),
        })
    }
}
