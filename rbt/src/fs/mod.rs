//! Filesystem layout of backup targets.

pub mod generations;
pub mod walker;
