//! Custom error types for rbt.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RbtError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("rsync exited with code {0}")]
    SyncFailed(i32),

    #[error("rsync terminated by signal")]
    SyncKilled,

    #[error("rsync did not finish within {0}s")]
    SyncTimeout(u64),

    #[error("Backup cancelled")]
    Cancelled,

    #[error("Interrupted rotation in {target}: orphan {orphan}, missing generations {missing:?}")]
    InterruptedRotation {
        target: PathBuf,
        orphan: PathBuf,
        missing: Vec<usize>,
    },

    #[error("Mail error: {0}")]
    Mail(String),
}

pub type Result<T> = std::result::Result<T, RbtError>;
