//! Backup job executor - runs one job end to end.
//!
//! Order of operations for a job:
//! 1. take the target's single-instance lock (skip the job if held)
//! 2. refuse to continue on an interrupted rotation, create missing slots
//! 3. rsync into the staging generation
//! 4. rotate the generation chain
//! 5. write the completion record into the new `backup.0`
//!
//! A failure in 2-3 leaves every existing generation untouched. The lock is
//! released on every exit path.

pub mod record;

use crate::job::Job;
use crate::process::FileLock;
use crate::sync::SyncCommand;
use crate::utils::{RbtError, Result};
use chrono::Local;
use record::CompletionRecord;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one job.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(CompletionRecord),
    /// Another live process holds the target's lock.
    Locked,
}

/// Per-batch tally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: Vec<String>,
    pub locked: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Main backup executor
pub struct BackupExecutor {
    rsync: PathBuf,
    cancel_token: CancellationToken,
}

impl BackupExecutor {
    /// Create a new backup executor (no cancellation support)
    pub fn new(rsync: impl Into<PathBuf>) -> Self {
        Self::with_cancel(rsync, CancellationToken::new())
    }

    /// Create a new backup executor with cancellation support
    pub fn with_cancel(rsync: impl Into<PathBuf>, cancel_token: CancellationToken) -> Self {
        Self {
            rsync: rsync.into(),
            cancel_token,
        }
    }

    /// Execute a backup job under its target lock.
    pub async fn execute(&self, job: &Job) -> Result<JobOutcome> {
        let layout = job.layout();
        std::fs::create_dir_all(layout.target())?;

        let lock = FileLock::acquire(layout.lock())?;
        if !lock.acquired() {
            return Ok(JobOutcome::Locked);
        }

        let record = self.run_locked(job).await?;
        drop(lock);
        Ok(JobOutcome::Completed(record))
    }

    /// Sync, rotate and record. The caller must hold the target lock.
    async fn run_locked(&self, job: &Job) -> Result<CompletionRecord> {
        let layout = job.layout();
        let start = Instant::now();

        layout.prepare()?;

        let command = SyncCommand::for_job(&self.rsync, job);
        let outcome = command
            .run(job.timeout.map(Duration::from_secs), &self.cancel_token)
            .await?;
        if outcome.exit_code != 0 {
            warn!(
                "[{}] rsync exited with {}, some source files vanished",
                job.name, outcome.exit_code
            );
        }

        layout.rotate()?;

        let record = CompletionRecord::new(
            job.name.clone(),
            Local::now().fixed_offset(),
            start.elapsed().as_secs_f64(),
            outcome.transferred_bytes,
        );
        record.write(&layout.completed())?;
        Ok(record)
    }

    /// Run every enabled job in order, optionally only the one named `only`.
    ///
    /// Failures are logged and tallied; the batch always runs to the end
    /// unless cancelled.
    pub async fn run_all(&self, jobs: &[Job], only: Option<&str>) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for job in jobs.iter().filter(|j| j.enabled) {
            if only.is_some_and(|name| name != job.name) {
                debug!("Skipping {}", job.name);
                continue;
            }
            if self.cancel_token.is_cancelled() {
                warn!("[{}] not started, shutdown requested", job.name);
                continue;
            }

            info!("Starting backup {}", job.name);
            match self.execute(job).await {
                Ok(JobOutcome::Completed(record)) => {
                    info!(
                        "[{}] completed in {}s ({} bytes transferred)",
                        job.name,
                        record.duration_text(),
                        record.size.map_or_else(|| "?".to_string(), |s| s.to_string())
                    );
                    summary.completed.push(job.name.clone());
                }
                Ok(JobOutcome::Locked) => {
                    info!("Unable to acquire lock for {}", job.name);
                    summary.locked.push(job.name.clone());
                }
                Err(e) => {
                    match &e {
                        RbtError::SyncFailed(code) => error!("[{}] Return code {}", job.name, code),
                        _ => error!("[{}] {}", job.name, e),
                    }
                    summary.failed.push((job.name.clone(), e.to_string()));
                }
            }
        }

        summary
    }
}
