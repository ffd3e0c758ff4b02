//! Utility modules for rbt.

pub mod errors;
pub mod logger;

pub use errors::{RbtError, Result};
