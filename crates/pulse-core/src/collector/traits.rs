//! Abstractions for filesystem access to enable testing and mocking.
//!
//! Every reader in this crate goes through `FileSystem`, so the same code runs
//! against the live `/proc` tree in production and against `MockFs` in tests.

use std::io;
use std::path::Path;

/// Capacity figures for one mounted filesystem, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsUsage {
    pub total: u64,
    pub free: u64,
    pub avail: u64,
}

/// Abstraction for filesystem operations.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Returns capacity figures for the filesystem mounted at `path`.
    fn statvfs(&self, path: &Path) -> io::Result<FsUsage>;
}

/// Real filesystem implementation that delegates to `std::fs` and `statvfs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn statvfs(&self, path: &Path) -> io::Result<FsUsage> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
        let block_size = stat.fragment_size() as u64;
        Ok(FsUsage {
            total: stat.blocks() as u64 * block_size,
            free: stat.blocks_free() as u64 * block_size,
            avail: stat.blocks_available() as u64 * block_size,
        })
    }
}
