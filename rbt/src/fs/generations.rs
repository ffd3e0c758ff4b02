//! Generation directory chain.
//!
//! A target directory holds `backup.0 .. backup.N`. `backup.0` is the newest
//! completed generation, `backup.N` is the staging slot rsync writes into.
//! Rotation promotes the staging slot to `backup.0` with plain renames only,
//! so a crash leaves a `backup.tmp` orphan that [`GenerationLayout::inspect`]
//! can recognise.

use crate::utils::{RbtError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the per-generation directory rsync populates.
pub const FILES_DIR: &str = "files";

/// Name of the completion record inside a generation.
pub const COMPLETED_FILE: &str = "completed";

/// Name of the single-instance lock file inside a target.
pub const LOCK_FILE: &str = "backup.lock";

/// Temporary name used while rotating.
pub const ROTATION_TEMP: &str = "backup.tmp";

/// Completion record of any target; does not depend on the retention depth.
pub fn completion_record_of(target: &Path) -> PathBuf {
    target.join("backup.0").join(COMPLETED_FILE)
}

/// Paths of one target's generation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationLayout {
    target: PathBuf,
    depth: usize,
}

/// On-disk state of a generation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    /// No generation directory exists yet.
    Fresh,
    /// All of `backup.0 .. backup.N` exist.
    Complete,
    /// Some slots are missing but no rotation was interrupted.
    Incomplete { missing: Vec<usize> },
    /// A rotation was interrupted: the temp orphan is still present.
    Interrupted { orphan: PathBuf, missing: Vec<usize> },
}

impl GenerationLayout {
    pub fn new(target: impl Into<PathBuf>, depth: usize) -> Self {
        Self {
            target: target.into(),
            depth,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// `backup.<idx>`
    pub fn generation(&self, idx: usize) -> PathBuf {
        self.target.join(format!("backup.{}", idx))
    }

    /// Newest completed generation.
    pub fn latest(&self) -> PathBuf {
        self.generation(0)
    }

    /// Slot the next sync is written to.
    pub fn staging(&self) -> PathBuf {
        self.generation(self.depth)
    }

    pub fn files(generation: &Path) -> PathBuf {
        generation.join(FILES_DIR)
    }

    pub fn completed(&self) -> PathBuf {
        completion_record_of(&self.target)
    }

    pub fn lock(&self) -> PathBuf {
        self.target.join(LOCK_FILE)
    }

    pub fn rotation_temp(&self) -> PathBuf {
        self.target.join(ROTATION_TEMP)
    }

    /// Inspect the chain without modifying anything.
    pub fn inspect(&self) -> ChainState {
        let missing: Vec<usize> = (0..=self.depth)
            .filter(|idx| !self.generation(*idx).is_dir())
            .collect();

        let orphan = self.rotation_temp();
        if orphan.exists() {
            return ChainState::Interrupted { orphan, missing };
        }

        if missing.is_empty() {
            ChainState::Complete
        } else if missing.len() == self.depth + 1 {
            ChainState::Fresh
        } else {
            ChainState::Incomplete { missing }
        }
    }

    /// Create every missing slot plus the staging `files/` directory, and drop
    /// the completion record the staging slot still carries from the time it
    /// was `backup.0`.
    ///
    /// Refuses to touch a chain whose last rotation was interrupted.
    pub fn prepare(&self) -> Result<()> {
        if let ChainState::Interrupted { orphan, missing } = self.inspect() {
            return Err(RbtError::InterruptedRotation {
                target: self.target.clone(),
                orphan,
                missing,
            });
        }

        for idx in 0..self.depth {
            let dir = self.generation(idx);
            if !dir.is_dir() {
                debug!("Creating generation {}", dir.display());
                fs::create_dir_all(&dir)?;
            }
        }

        let staging = self.staging();
        fs::create_dir_all(Self::files(&staging))?;

        let stale = staging.join(COMPLETED_FILE);
        remove_if_present(&stale)?;
        remove_if_present(&stale.with_extension("partial"))?;
        Ok(())
    }

    /// Promote the staging slot to `backup.0`, shifting every generation up
    /// by one. The previous `backup.N` content is what the staging slot was
    /// synced over, so the oldest generation is gone after this.
    pub fn rotate(&self) -> Result<()> {
        let temp = self.rotation_temp();
        fs::rename(self.staging(), &temp)?;

        for idx in (0..self.depth).rev() {
            fs::rename(self.generation(idx), self.generation(idx + 1))?;
        }

        fs::rename(&temp, self.latest())?;
        debug!("Rotated {} generations in {}", self.depth, self.target.display());
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Populate every slot with a marker file naming the slot.
    fn populate(layout: &GenerationLayout) {
        for idx in 0..=layout.depth() {
            let files = GenerationLayout::files(&layout.generation(idx));
            fs::create_dir_all(&files).unwrap();
            fs::write(files.join("marker"), format!("gen{}", idx)).unwrap();
        }
    }

    fn marker(layout: &GenerationLayout, idx: usize) -> String {
        let files = GenerationLayout::files(&layout.generation(idx));
        fs::read_to_string(files.join("marker")).unwrap()
    }

    #[test]
    fn test_rotation_shifts_every_generation() {
        for depth in 1..=5 {
            let dir = TempDir::new().unwrap();
            let layout = GenerationLayout::new(dir.path(), depth);
            populate(&layout);

            layout.rotate().unwrap();

            // staged content is the new head
            assert_eq!(marker(&layout, 0), format!("gen{}", depth));
            // every older generation moved up by one
            for idx in 1..=depth {
                assert_eq!(marker(&layout, idx), format!("gen{}", idx - 1));
            }
            assert!(!layout.rotation_temp().exists());
            assert_eq!(layout.inspect(), ChainState::Complete);
        }
    }

    #[test]
    fn test_rotation_is_a_bijection() {
        let dir = TempDir::new().unwrap();
        let layout = GenerationLayout::new(dir.path(), 4);
        populate(&layout);

        layout.rotate().unwrap();

        let mut markers: Vec<String> = (0..=4).map(|idx| marker(&layout, idx)).collect();
        markers.sort();
        let expected: Vec<String> = (0..=4).map(|idx| format!("gen{}", idx)).collect();
        assert_eq!(markers, expected);
    }

    #[test]
    fn test_repeated_rotation_keeps_chain_complete() {
        let dir = TempDir::new().unwrap();
        let layout = GenerationLayout::new(dir.path(), 2);
        populate(&layout);

        for round in 0..6 {
            fs::write(
                GenerationLayout::files(&layout.staging()).join("marker"),
                format!("round{}", round),
            )
            .unwrap();
            layout.rotate().unwrap();
            assert_eq!(marker(&layout, 0), format!("round{}", round));
            assert_eq!(layout.inspect(), ChainState::Complete);
        }
    }

    #[test]
    fn test_prepare_creates_slots() {
        let dir = TempDir::new().unwrap();
        let layout = GenerationLayout::new(dir.path(), 3);
        assert_eq!(layout.inspect(), ChainState::Fresh);

        layout.prepare().unwrap();

        for idx in 0..3 {
            assert!(layout.generation(idx).is_dir());
        }
        assert!(GenerationLayout::files(&layout.staging()).is_dir());
        assert_eq!(layout.inspect(), ChainState::Complete);
    }

    #[test]
    fn test_prepare_drops_stale_record_from_staging() {
        let dir = TempDir::new().unwrap();
        let layout = GenerationLayout::new(dir.path(), 2);
        populate(&layout);
        let staging = layout.staging();
        fs::write(staging.join(COMPLETED_FILE), "name: old\n").unwrap();
        fs::create_dir_all(staging.join("completed.partial")).unwrap();
        fs::write(layout.completed(), "name: current\n").unwrap();

        layout.prepare().unwrap();

        assert!(!staging.join(COMPLETED_FILE).exists());
        assert!(!staging.join("completed.partial").exists());
        // the record of the newest generation stays
        assert!(layout.completed().exists());
    }

    #[test]
    fn test_gap_without_orphan_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let layout = GenerationLayout::new(dir.path(), 3);
        populate(&layout);
        fs::remove_dir_all(layout.generation(2)).unwrap();

        assert_eq!(layout.inspect(), ChainState::Incomplete { missing: vec![2] });
        layout.prepare().unwrap();
        assert_eq!(layout.inspect(), ChainState::Complete);
    }

    #[test]
    fn test_interrupted_rotation_is_detected_and_not_healed() {
        let dir = TempDir::new().unwrap();
        let layout = GenerationLayout::new(dir.path(), 3);
        populate(&layout);

        // crash after step 1 and one shift of step 2
        fs::rename(layout.staging(), layout.rotation_temp()).unwrap();
        fs::rename(layout.generation(2), layout.generation(3)).unwrap();

        let state = layout.inspect();
        assert_eq!(
            state,
            ChainState::Interrupted {
                orphan: layout.rotation_temp(),
                missing: vec![2],
            }
        );

        let err = layout.prepare().unwrap_err();
        assert!(matches!(err, RbtError::InterruptedRotation { .. }));
        assert!(!layout.generation(2).exists());
        assert!(layout.rotation_temp().exists());
    }
}
