//! Process-wide, read-only state shared by every unit.

use crate::loader::{ByteTransformer, DirectorySource, SourceProvider, SourceSet, SourceTier};
use crate::naming::NamingResources;
use crate::plugin::{EntryCatalog, PluginEntry};
use crate::vfs::Vfs;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Sources, shared artifact directories, plugin entries and process naming.
///
/// Built once and handed to units behind an `Arc`; nothing in it changes afterwards.
pub struct Platform {
    vfs: Arc<dyn Vfs>,
    sources: SourceSet,
    shared_dirs: Vec<PathBuf>,
    catalog: EntryCatalog,
    naming: Arc<NamingResources>,
    transformers: Vec<Arc<dyn ByteTransformer>>,
}

impl Platform {
    pub fn builder(vfs: Arc<dyn Vfs>) -> PlatformBuilder {
        PlatformBuilder {
            vfs,
            bootstrap: Vec::new(),
            shared: Vec::new(),
            parent: Vec::new(),
            catalog: EntryCatalog::new(),
            naming: None,
            transformers: Vec::new(),
        }
    }

    pub fn vfs(&self) -> &Arc<dyn Vfs> {
        &self.vfs
    }

    /// Bootstrap, shared and parent tiers. The local tier is always empty.
    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    /// Library directories whose children are shared artifacts.
    pub fn shared_dirs(&self) -> &[PathBuf] {
        &self.shared_dirs
    }

    pub fn catalog(&self) -> &EntryCatalog {
        &self.catalog
    }

    pub fn naming(&self) -> &Arc<NamingResources> {
        &self.naming
    }

    pub fn transformers(&self) -> &[Arc<dyn ByteTransformer>] {
        &self.transformers
    }

    /// The platform tiers plus the local sources of a unit rooted at `base`:
    /// its `classes/` directory, then each artifact under `lib/` by name.
    pub fn unit_sources(&self, base: &Path) -> io::Result<SourceSet> {
        let mut sources = self.sources.clone();
        let classes = base.join("classes");
        if self.vfs.is_dir(&classes) {
            sources.local.push(self.directory(classes));
        }
        sources.local.extend(self.artifact_sources(&base.join("lib"))?);
        Ok(sources)
    }

    fn directory(&self, root: PathBuf) -> Arc<dyn SourceProvider> {
        Arc::new(DirectorySource::at(root, Arc::clone(&self.vfs)))
    }

    fn artifact_sources(&self, dir: &Path) -> io::Result<Vec<Arc<dyn SourceProvider>>> {
        artifact_dirs(self.vfs.as_ref(), dir).map(|dirs| dirs.into_iter().map(|d| self.directory(d)).collect())
    }
}

fn artifact_dirs(vfs: &dyn Vfs, dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !vfs.is_dir(dir) {
        return Ok(Vec::new());
    }
    Ok(vfs
        .list_dir(dir)?
        .into_iter()
        .filter(|child| vfs.is_dir(child))
        .collect())
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("sources", &self.sources)
            .field("shared_dirs", &self.shared_dirs)
            .field("catalog", &self.catalog)
            .field("transformers", &self.transformers.len())
            .finish()
    }
}

pub struct PlatformBuilder {
    vfs: Arc<dyn Vfs>,
    bootstrap: Vec<PathBuf>,
    shared: Vec<PathBuf>,
    parent: Vec<PathBuf>,
    catalog: EntryCatalog,
    naming: Option<Arc<NamingResources>>,
    transformers: Vec<Arc<dyn ByteTransformer>>,
}

impl PlatformBuilder {
    /// A source root consulted before anything else.
    pub fn bootstrap_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.bootstrap.push(root.into());
        self
    }

    /// A library directory: each child directory becomes a shared source and a shared artifact.
    pub fn shared_library(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shared.push(dir.into());
        self
    }

    /// A source root of the enclosing scope.
    pub fn parent_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.parent.push(root.into());
        self
    }

    pub fn entry(mut self, name: impl Into<String>, entry: Arc<dyn PluginEntry>) -> Self {
        self.catalog.insert(name, entry);
        self
    }

    pub fn catalog(mut self, catalog: EntryCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn ByteTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn naming(mut self, naming: Arc<NamingResources>) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn build(self) -> io::Result<Platform> {
        let vfs = self.vfs;
        let directory = |root: PathBuf| -> Arc<dyn SourceProvider> {
            Arc::new(DirectorySource::at(root, Arc::clone(&vfs)))
        };

        let mut sources = SourceSet::new();
        for root in self.bootstrap {
            sources = sources.with(SourceTier::Bootstrap, directory(root));
        }
        for root in self.parent {
            sources = sources.with(SourceTier::Parent, directory(root));
        }
        for dir in &self.shared {
            if !vfs.is_dir(dir) {
                warn!(dir = %dir.display(), "Shared library directory does not exist");
                continue;
            }
            for artifact in artifact_dirs(vfs.as_ref(), dir)? {
                debug!(artifact = %artifact.display(), "Shared source");
                sources = sources.with(SourceTier::Shared, directory(artifact));
            }
        }

        Ok(Platform {
            vfs: Arc::clone(&vfs),
            sources,
            shared_dirs: self.shared,
            catalog: self.catalog,
            naming: self
                .naming
                .unwrap_or_else(|| Arc::new(NamingResources::global())),
            transformers: self.transformers,
        })
    }
}
