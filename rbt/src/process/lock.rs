//! Single-instance lock for a backup target.
//!
//! The lock is a file holding the owner's PID. A lock whose owner no longer
//! exists is stale and may be taken over. Liveness is probed with signal 0:
//! only `ESRCH` counts as dead, every other failure (e.g. `EPERM` for a
//! process owned by another user) keeps the lock held.
//!
//! The read-check-write sequence runs under an exclusive `flock` on the
//! lock's parent directory, so concurrent acquirers cannot both win.

use crate::utils::Result;
use fs4::fs_std::FileExt;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Result of probing a PID with signal 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    /// The probe failed for another reason; treated as alive.
    Indeterminate(Errno),
}

impl Liveness {
    pub fn holds_lock(self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

/// Probe whether `pid` refers to a running process.
pub fn probe(pid: i32) -> Liveness {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => Liveness::Alive,
        Err(Errno::ESRCH) => Liveness::Dead,
        Err(e) => Liveness::Indeterminate(e),
    }
}

/// What an existing lock file says about its owner.
#[derive(Debug, PartialEq, Eq)]
enum Owner {
    Absent,
    Pid(i32),
    Unreadable,
}

fn read_owner(path: &Path) -> Result<Owner> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Owner::Pid(pid),
            _ => Owner::Unreadable,
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Owner::Absent),
        Err(e) => Err(e.into()),
    }
}

/// Scoped lock handle. The lock file is removed when the handle is released
/// or dropped, but only if this handle acquired it.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    acquired: bool,
}

impl FileLock {
    /// Try to take the lock at `path`. Contention is not an error: check
    /// [`FileLock::acquired`] on the returned handle.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let _guard = DirGuard::lock(&path)?;

        let acquired = match read_owner(&path)? {
            Owner::Absent => true,
            Owner::Unreadable => {
                warn!("Replacing unreadable lock file {}", path.display());
                true
            }
            Owner::Pid(pid) => match probe(pid) {
                Liveness::Dead => {
                    warn!(
                        "Taking over stale lock {} (pid {} is gone)",
                        path.display(),
                        pid
                    );
                    true
                }
                Liveness::Alive => {
                    debug!("Lock {} held by pid {}", path.display(), pid);
                    false
                }
                Liveness::Indeterminate(e) => {
                    debug!(
                        "Lock {} owner pid {} could not be probed ({}), assuming alive",
                        path.display(),
                        pid,
                        e
                    );
                    false
                }
            },
        };

        if acquired {
            fs::write(&path, std::process::id().to_string())?;
        }

        Ok(Self { path, acquired })
    }

    pub fn acquired(&self) -> bool {
        self.acquired
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file if this handle owns it. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        if !self.acquired {
            return Ok(());
        }
        self.acquired = false;

        let _guard = DirGuard::lock(&self.path)?;
        match read_owner(&self.path)? {
            Owner::Pid(pid) if pid as u32 == std::process::id() => {
                fs::remove_file(&self.path)?;
                debug!("Released lock {}", self.path.display());
            }
            other => {
                warn!(
                    "Lock {} no longer ours ({:?}), leaving it",
                    self.path.display(),
                    other
                );
            }
        }
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Exclusive `flock` on the directory containing a lock file, released on drop.
struct DirGuard(File);

impl DirGuard {
    fn lock(lock_path: &Path) -> Result<Self> {
        let dir = match lock_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let file = File::open(dir)?;
        file.lock_exclusive()?;
        Ok(Self(file))
    }
}
