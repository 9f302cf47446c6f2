//! Snapshot naming and the resume signal.
//!
//! A snapshot for step `N` lives at `<dir>/snap_<N>.msgpack`. Its presence is
//! the only signal that the chunk ending at `N` is complete; the file content
//! is never inspected here.

use crate::error::{Result, TrainError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SNAPSHOT_PREFIX: &str = "snap_";
pub const SNAPSHOT_EXTENSION: &str = "msgpack";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Canonical path of the snapshot taken at `step`.
    pub fn path(&self, step: u32) -> PathBuf {
        self.dir
            .join(format!("{SNAPSHOT_PREFIX}{step}.{SNAPSHOT_EXTENSION}"))
    }

    pub fn exists(&self, step: u32) -> bool {
        self.path(step).is_file()
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|source| TrainError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    /// Highest step with a snapshot on disk, if any.
    pub fn latest(&self) -> Result<Option<u32>> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| TrainError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let latest = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| step_from_path(&entry.path()))
            .max();
        debug!(dir = %self.dir.display(), ?latest, "Scanned snapshots");
        Ok(latest)
    }
}

/// Parse the step out of a `snap_<step>.msgpack` file name.
pub fn step_from_path(path: &Path) -> Option<u32> {
    if path.extension()?.to_str()? != SNAPSHOT_EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(SNAPSHOT_PREFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_path_format() {
        let store = SnapshotStore::new("/data/lego/base/snapshot");
        assert_eq!(
            store.path(2000),
            PathBuf::from("/data/lego/base/snapshot/snap_2000.msgpack")
        );
    }

    #[test]
    fn test_step_from_path() {
        assert_eq!(step_from_path(Path::new("a/snap_4000.msgpack")), Some(4000));
        assert_eq!(step_from_path(Path::new("a/snap_4000.json")), None);
        assert_eq!(step_from_path(Path::new("a/other_4000.msgpack")), None);
        assert_eq!(step_from_path(Path::new("a/snap_x.msgpack")), None);
    }

    #[test]
    fn test_exists_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snapshot"));
        assert_eq!(store.latest().unwrap(), None);

        store.ensure_dir().unwrap();
        fs::write(store.path(2000), b"a").unwrap();
        fs::write(store.path(6000), b"b").unwrap();
        fs::write(store.dir().join("notes.txt"), b"c").unwrap();

        assert!(store.exists(2000));
        assert!(!store.exists(4000));
        assert_eq!(store.latest().unwrap(), Some(6000));
    }
}
