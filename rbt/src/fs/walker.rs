//! Discovery of backup targets below a report root.
//!
//! A directory is a target when it holds a generation, a lock, a rotation
//! orphan, a status plugin or an ignore marker. The walk does not descend
//! into targets.

use crate::fs::generations::{LOCK_FILE, ROTATION_TEMP};
use crate::status::{IGNORE_MARKER, PLUGIN_FILE};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Options for target discovery
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// How many levels below the root targets may sit
    pub max_depth: usize,

    /// Only keep targets whose path relative to the root contains this
    pub filter: Option<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            filter: None,
        }
    }
}

/// Entries whose presence marks a directory as a backup target.
const TARGET_MARKERS: [&str; 5] = [
    "backup.0",
    LOCK_FILE,
    ROTATION_TEMP,
    PLUGIN_FILE,
    IGNORE_MARKER,
];

pub fn is_target(dir: &Path) -> bool {
    TARGET_MARKERS.iter().any(|name| dir.join(name).exists())
}

/// Find all targets below `root`, sorted by path.
///
/// Unreadable directories are logged and skipped.
pub fn find_targets(root: &Path, options: &WalkOptions) -> Vec<PathBuf> {
    if is_target(root) {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !matches_filter(&name, options) {
            return Vec::new();
        }
        return vec![root.to_path_buf()];
    }

    let mut targets = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(options.max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_dir() || !is_target(entry.path()) {
            continue;
        }
        walker.skip_current_dir();

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if !matches_filter(&relative.to_string_lossy(), options) {
            continue;
        }

        targets.push(entry.into_path());
    }

    targets
}

fn matches_filter(path: &str, options: &WalkOptions) -> bool {
    options
        .filter
        .as_deref()
        .map_or(true, |filter| path.contains(filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_target(root: &Path, rel: &str) -> PathBuf {
        let dir = root.join(rel);
        fs::create_dir_all(dir.join("backup.0/files/nested")).unwrap();
        // would look like a target if the walk descended into it
        fs::create_dir_all(dir.join("backup.0/files/nested/backup.0")).unwrap();
        dir
    }

    #[test]
    fn test_empty_root() {
        let root = TempDir::new().unwrap();
        assert!(find_targets(root.path(), &WalkOptions::default()).is_empty());
    }

    #[test]
    fn test_finds_targets_in_categories() {
        let root = TempDir::new().unwrap();
        let web1 = make_target(root.path(), "servers/web1");
        let db1 = make_target(root.path(), "databases/db1");
        fs::create_dir_all(root.path().join("servers/not-a-target")).unwrap();

        let targets = find_targets(root.path(), &WalkOptions::default());
        assert_eq!(targets, vec![db1, web1]);
    }

    #[test]
    fn test_marker_only_targets() {
        let root = TempDir::new().unwrap();
        let plugin = root.path().join("custom");
        fs::create_dir_all(&plugin).unwrap();
        fs::write(plugin.join(PLUGIN_FILE), "#!/bin/sh\n").unwrap();
        let ignored = root.path().join("old");
        fs::create_dir_all(&ignored).unwrap();
        fs::write(ignored.join(IGNORE_MARKER), "").unwrap();

        let targets = find_targets(root.path(), &WalkOptions::default());
        assert_eq!(targets, vec![plugin, ignored]);
    }

    #[test]
    fn test_depth_limit() {
        let root = TempDir::new().unwrap();
        make_target(root.path(), "a/b/c/deep");

        let shallow = WalkOptions {
            max_depth: 2,
            filter: None,
        };
        assert!(find_targets(root.path(), &shallow).is_empty());

        let deep = WalkOptions {
            max_depth: 4,
            filter: None,
        };
        assert_eq!(find_targets(root.path(), &deep).len(), 1);
    }

    #[test]
    fn test_filter() {
        let root = TempDir::new().unwrap();
        make_target(root.path(), "servers/web1");
        let db1 = make_target(root.path(), "servers/db1");

        let options = WalkOptions {
            max_depth: 3,
            filter: Some("db".to_string()),
        };
        assert_eq!(find_targets(root.path(), &options), vec![db1]);
    }

    #[test]
    fn test_root_is_target() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("backup.0")).unwrap();
        assert_eq!(
            find_targets(root.path(), &WalkOptions::default()),
            vec![root.path().to_path_buf()]
        );
    }

    #[test]
    fn test_filter_applies_to_root_target() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("db1");
        fs::create_dir_all(root.join("backup.0")).unwrap();

        let miss = WalkOptions {
            max_depth: 3,
            filter: Some("web".to_string()),
        };
        assert!(find_targets(&root, &miss).is_empty());

        let hit = WalkOptions {
            max_depth: 3,
            filter: Some("db".to_string()),
        };
        assert_eq!(find_targets(&root, &hit), vec![root.clone()]);
    }
}
