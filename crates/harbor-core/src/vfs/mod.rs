//! Virtual file system used by source providers and the artifact scanner.

use std::io::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Virtual File System trait
///
/// Abstraction over file system operations so that unit layouts can live on:
/// - the OS file system
/// - an in-memory tree (tests, embedded deployments)
///
/// # Contract
///
/// - **`exists(path)`**: `true` if the path refers to either a file OR a directory.
/// - **`is_dir(path)`**: `true` only if the path is a directory. Implies `exists()`.
/// - **`read(path)`**: Only succeeds for files, not directories.
/// - **`list_dir(path)`**: Immediate children of a directory, sorted by path.
///   Fails if the path is not a directory.
/// - **`glob(pattern)`**: All matching file paths.
///
/// Implementations are shared between units and worker threads, hence `Send + Sync`.
pub trait Vfs: Send + Sync {
    /// Read a file to bytes.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Read a file to a string.
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Write bytes to a file, creating parent directories as needed.
    fn write(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Check if a path exists (file OR directory).
    fn exists(&self, path: &Path) -> bool;

    /// Check if a path is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// List the immediate children of a directory, sorted.
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Create a directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Resolve a glob pattern to the matching file paths.
    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>>;

    /// Remove a file or directory (recursively).
    fn remove(&self, path: &Path) -> Result<()>;

    /// Get file metadata.
    fn metadata(&self, path: &Path) -> Result<FileMetadata>;
}

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub is_file: bool,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

pub use memory::MemoryVfs;
pub use os::OsVfs;

mod memory;
mod os;
