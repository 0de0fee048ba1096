use super::{FileMetadata, Vfs};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Result;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// In-Memory File System implementation
///
/// Directories are implicit: a path is a directory when some file lives below it.
/// Clones share the same tree.
#[derive(Clone, Default, Debug)]
pub struct MemoryVfs {
    files: Arc<Mutex<BTreeMap<PathBuf, Vec<u8>>>>,
}

impl MemoryVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper for populating fixtures.
    pub fn with_file(self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Self {
        self.files
            .lock()
            .insert(Self::normalize_path(path.as_ref()), content.as_ref().to_vec());
        self
    }

    fn normalize_path(path: &Path) -> PathBuf {
        let mut normalized = PathBuf::new();
        for component in path.components() {
            if let Component::CurDir = component {
                continue;
            }
            normalized.push(component);
        }
        if normalized.as_os_str().is_empty() {
            return PathBuf::from(".");
        }
        normalized
    }

    fn is_root(path: &Path) -> bool {
        path == Path::new(".") || path == Path::new("/")
    }

    fn has_children(files: &BTreeMap<PathBuf, Vec<u8>>, path: &Path) -> bool {
        if Self::is_root(path) {
            return !files.is_empty();
        }
        files.keys().any(|k| k.starts_with(path) && k != path)
    }

    fn not_found(path: &Path) -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {:?}", path),
        )
    }
}

impl Vfs for MemoryVfs {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = MemoryVfs::normalize_path(path);
        let files = self.files.lock();
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| MemoryVfs::not_found(&path))
    }

    fn write(&self, path: &Path, content: &[u8]) -> Result<()> {
        let path = MemoryVfs::normalize_path(path);
        self.files.lock().insert(path, content.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let path = MemoryVfs::normalize_path(path);
        let files = self.files.lock();
        files.contains_key(&path) || MemoryVfs::has_children(&files, &path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = MemoryVfs::normalize_path(path);
        let files = self.files.lock();
        MemoryVfs::has_children(&files, &path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let path = MemoryVfs::normalize_path(path);
        let files = self.files.lock();
        if !MemoryVfs::has_children(&files, &path) {
            return Err(MemoryVfs::not_found(&path));
        }

        let mut entries = BTreeSet::new();
        for k in files.keys() {
            let cwd = path == Path::new(".");
            let relative = match k.strip_prefix(&path) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ if cwd && k.is_relative() => k.as_path(),
                _ => continue,
            };
            if let Some(first) = relative.components().next() {
                let child = if cwd {
                    PathBuf::from(first.as_os_str())
                } else {
                    path.join(first)
                };
                entries.insert(child);
            }
        }
        Ok(entries.into_iter().collect())
    }

    fn create_dir_all(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn glob(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let files = self.files.lock();
        let glob_pattern = glob::Pattern::new(pattern)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        Ok(files
            .keys()
            .filter(|path| glob_pattern.matches_path(path))
            .cloned()
            .collect())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let path = MemoryVfs::normalize_path(path);
        let mut files = self.files.lock();
        files.retain(|k, _| !k.starts_with(&path));
        Ok(())
    }

    fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let path = MemoryVfs::normalize_path(path);
        let files = self.files.lock();

        if let Some(content) = files.get(&path) {
            return Ok(FileMetadata {
                size: content.len() as u64,
                is_file: true,
                is_dir: false,
                modified: None,
            });
        }
        if MemoryVfs::has_children(&files, &path) {
            return Ok(FileMetadata {
                size: 0,
                is_file: false,
                is_dir: true,
                modified: None,
            });
        }
        Err(MemoryVfs::not_found(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> MemoryVfs {
        MemoryVfs::new()
            .with_file("/apps/shop/lib/a/plugins.toml", "")
            .with_file("/apps/shop/lib/a/x/Y.type", "{}")
            .with_file("/apps/shop/lib/b.bin", [0u8, 1])
            .with_file("/apps/shop/classes/shop/Main.type", "{}")
    }

    #[test]
    fn list_dir_returns_immediate_children() {
        let vfs = fixture();
        let listed = vfs.list_dir(Path::new("/apps/shop/lib")).unwrap();
        assert_eq!(
            listed,
            vec![
                PathBuf::from("/apps/shop/lib/a"),
                PathBuf::from("/apps/shop/lib/b.bin")
            ]
        );
    }

    #[test]
    fn directories_are_implicit() {
        let vfs = fixture();
        assert!(vfs.is_dir(Path::new("/apps/shop/lib/a")));
        assert!(!vfs.is_dir(Path::new("/apps/shop/lib/b.bin")));
        assert!(vfs.exists(Path::new("/apps/shop/classes")));
        assert!(vfs.list_dir(Path::new("/apps/missing")).is_err());
        assert!(vfs.metadata(Path::new("/apps/shop/lib")).unwrap().is_dir);
    }

    #[test]
    fn glob_matches_nested_files() {
        let vfs = fixture();
        let found = vfs.glob("/apps/shop/lib/a/**/*.type").unwrap();
        assert_eq!(found, vec![PathBuf::from("/apps/shop/lib/a/x/Y.type")]);
    }

    #[test]
    fn remove_drops_subtree() {
        let vfs = fixture();
        vfs.remove(Path::new("/apps/shop/lib")).unwrap();
        assert!(!vfs.exists(Path::new("/apps/shop/lib/a/plugins.toml")));
        assert!(vfs.exists(Path::new("/apps/shop/classes/shop/Main.type")));
    }
}
