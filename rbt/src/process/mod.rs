//! Process-level concerns: the per-target lock and signal handling.

pub mod lock;
pub mod shutdown;

pub use lock::FileLock;
pub use shutdown::ShutdownCoordinator;
