//! In-memory mock filesystem for testing collectors without real `/proc`.

use crate::collector::traits::{FileSystem, FsUsage};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// In-memory filesystem for testing.
///
/// Clones share storage, so a test can keep a handle and rewrite `/proc` files
/// between two reads made by a collector that owns another clone. This is how
/// successive counter snapshots are simulated.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    inner: Arc<RwLock<MockFsInner>>,
}

#[derive(Debug, Default)]
struct MockFsInner {
    files: HashMap<PathBuf, String>,
    mounts: HashMap<PathBuf, FsUsage>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file with the given content.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .files
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    /// Removes a file, simulating a source that vanished.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.files.remove(path.as_ref());
    }

    /// Registers capacity figures returned by `statvfs` for a mount point.
    pub fn add_mount(&self, mount_point: impl AsRef<Path>, total: u64, free: u64, avail: u64) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .mounts
            .insert(mount_point.as_ref().to_path_buf(), FsUsage { total, free, avail });
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn statvfs(&self, path: &Path) -> io::Result<FsUsage> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.mounts.get(path).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no filesystem mounted at {:?}", path),
            )
        })
    }
}
