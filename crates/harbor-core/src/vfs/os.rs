use super::{FileMetadata, Vfs};
use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

/// Reads and writes the real file system. Paths are used as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsVfs;

impl Vfs for OsVfs {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>>>()?;
        entries.sort();
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let matches = glob::glob(pattern).map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
        let mut files = Vec::new();
        for found in matches {
            let path = found.map_err(Error::other)?;
            if path.is_file() {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        fs::metadata(path).map(|m| FileMetadata {
            size: m.len(),
            is_file: m.is_file(),
            is_dir: m.is_dir(),
            modified: m.modified().ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_children_sorted() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let vfs = OsVfs;
        vfs.write(&temp.path().join("b/inner.txt"), b"x")?;
        vfs.write(&temp.path().join("a.txt"), b"y")?;

        let listed = vfs.list_dir(temp.path())?;
        assert_eq!(listed, vec![temp.path().join("a.txt"), temp.path().join("b")]);
        assert_eq!(vfs.read_to_string(&temp.path().join("a.txt"))?, "y");
        Ok(())
    }
}
