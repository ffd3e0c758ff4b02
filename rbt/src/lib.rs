//! rbt - rotating rsync backups
//!
//! Pulls file trees with rsync into a fixed-depth chain of generation
//! directories, reusing unchanged files as hard links, and reports on the
//! freshness of every backup target.

pub mod config;
pub mod executor;
pub mod fs;
pub mod job;
pub mod process;
pub mod report;
pub mod status;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use utils::errors::RbtError;
pub type Result<T> = std::result::Result<T, RbtError>;
