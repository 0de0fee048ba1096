//! Source providers: the places a [`ModuleLoader`](super::ModuleLoader) can pull type bytes from.

use crate::vfs::Vfs;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extension of a type definition inside a source root.
pub const TYPE_FILE_EXTENSION: &str = "type";

/// Which group of sources a provider belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTier {
    /// Process bootstrap sources, consulted before anything else.
    Bootstrap,
    /// Platform-shared libraries visible to every unit.
    Shared,
    /// The unit's own classes directory and bundled artifacts.
    Local,
    /// Sources of the enclosing (parent) scope.
    Parent,
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceTier::Bootstrap => "bootstrap",
            SourceTier::Shared => "shared",
            SourceTier::Local => "local",
            SourceTier::Parent => "parent",
        };
        f.write_str(label)
    }
}

/// Anything that can answer "do you have bytes for type X".
pub trait SourceProvider: Send + Sync + fmt::Debug {
    /// Human readable identity, reported as the origin of definitions.
    fn name(&self) -> &str;

    /// Bytes for `type_name`, or `None` when this source does not supply it.
    fn fetch(&self, type_name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Every type name this source can supply.
    fn type_names(&self) -> io::Result<Vec<String>>;
}

/// A directory of `.type` files laid out by package: `a.b.C` lives at `<root>/a/b/C.type`.
pub struct DirectorySource {
    name: String,
    root: PathBuf,
    vfs: Arc<dyn Vfs>,
}

impl DirectorySource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, vfs: Arc<dyn Vfs>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            vfs,
        }
    }

    /// Source named after its root path.
    pub fn at(root: impl Into<PathBuf>, vfs: Arc<dyn Vfs>) -> Self {
        let root = root.into();
        Self::new(root.display().to_string(), root, vfs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a dotted type name to its file. Names with empty or path-like segments map to nothing.
    fn path_for(&self, type_name: &str) -> Option<PathBuf> {
        let segments: Vec<&str> = type_name.split('.').collect();
        if segments
            .iter()
            .any(|s| s.is_empty() || s.contains(['/', '\\']) || *s == "..")
        {
            return None;
        }
        let (last, packages) = segments.split_last()?;
        let mut path = self.root.clone();
        for package in packages {
            path.push(package);
        }
        path.push(format!("{}.{}", last, TYPE_FILE_EXTENSION));
        Some(path)
    }

    fn name_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?.with_extension("");
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("."))
        }
    }
}

impl fmt::Debug for DirectorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectorySource")
            .field("name", &self.name)
            .field("root", &self.root)
            .finish()
    }
}

impl SourceProvider for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, type_name: &str) -> io::Result<Option<Vec<u8>>> {
        let Some(path) = self.path_for(type_name) else {
            return Ok(None);
        };
        if !self.vfs.exists(&path) || self.vfs.is_dir(&path) {
            return Ok(None);
        }
        self.vfs.read(&path).map(Some)
    }

    fn type_names(&self) -> io::Result<Vec<String>> {
        if !self.vfs.is_dir(&self.root) {
            return Ok(Vec::new());
        }
        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let pattern = format!("{}/**/*.{}", root.trim_end_matches('/'), TYPE_FILE_EXTENSION);
        let mut names: Vec<String> = self
            .vfs
            .glob(&pattern)?
            .iter()
            .filter_map(|p| self.name_for(p))
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// The four tiers of sources a loader walks.
///
/// Shared tiers are built once by the platform and handed to every unit; the
/// local tier belongs to one unit only.
#[derive(Clone, Default, Debug)]
pub struct SourceSet {
    pub bootstrap: Vec<Arc<dyn SourceProvider>>,
    pub shared: Vec<Arc<dyn SourceProvider>>,
    pub local: Vec<Arc<dyn SourceProvider>>,
    pub parent: Vec<Arc<dyn SourceProvider>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(&self, tier: SourceTier) -> &[Arc<dyn SourceProvider>] {
        match tier {
            SourceTier::Bootstrap => &self.bootstrap,
            SourceTier::Shared => &self.shared,
            SourceTier::Local => &self.local,
            SourceTier::Parent => &self.parent,
        }
    }

    pub fn with(mut self, tier: SourceTier, provider: Arc<dyn SourceProvider>) -> Self {
        match tier {
            SourceTier::Bootstrap => self.bootstrap.push(provider),
            SourceTier::Shared => self.shared.push(provider),
            SourceTier::Local => self.local.push(provider),
            SourceTier::Parent => self.parent.push(provider),
        }
        self
    }

    /// Flatten into one ordered list following the given tier order.
    pub fn ordered(&self, tiers: &[SourceTier]) -> Vec<(SourceTier, Arc<dyn SourceProvider>)> {
        tiers
            .iter()
            .flat_map(|tier| self.tier(*tier).iter().map(move |p| (*tier, Arc::clone(p))))
            .collect()
    }
}
