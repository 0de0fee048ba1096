//! Artifact scanning.
//!
//! A scan walks the artifacts of one unit in phases and hands each surviving
//! artifact to a [`ScanCallback`]:
//!
//! 1. unit-local artifacts under `lib/`, sorted by name
//! 2. the unit's embedded `classes/` directory (plugin and layer scans)
//! 3. shared library artifacts, in configured directory order (tag-library,
//!    fragment and plugin scans)
//!
//! Phases never interleave, so local artifacts are always visited before shared
//! ones. Shared directories are listed in parallel; their results are
//! concatenated in configured order before any of them is visited.

pub mod filter;

pub use filter::{FilterRules, ScanFilter, ScanFilterConfig};

use crate::vfs::Vfs;
use rayon::prelude::*;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Error type callbacks report per artifact.
pub type VisitError = Box<dyn std::error::Error + Send + Sync>;

/// What a scan is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanKind {
    /// Tag-library descriptors
    Tld,
    /// Configuration fragments
    Fragment,
    /// Plugin declarations
    Plugin,
    /// Resource layers
    Layer,
}

impl ScanKind {
    fn includes_classes(self) -> bool {
        matches!(self, ScanKind::Plugin | ScanKind::Layer)
    }

    fn includes_shared(self) -> bool {
        matches!(self, ScanKind::Tld | ScanKind::Fragment | ScanKind::Plugin)
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScanKind::Tld => "tld",
            ScanKind::Fragment => "fragment",
            ScanKind::Plugin => "plugin",
            ScanKind::Layer => "layer",
        };
        f.write_str(label)
    }
}

/// Where an artifact lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanScope {
    UnitLocal,
    SharedLibrary,
}

/// Identity of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    path: PathBuf,
    scope: ScanScope,
}

impl ArtifactDescriptor {
    pub fn new(path: impl Into<PathBuf>, scope: ScanScope) -> Self {
        Self {
            path: path.into(),
            scope,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scope(&self) -> ScanScope {
        self.scope
    }

    /// Final path component, which filter patterns match against.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// An artifact as handed to a callback: its descriptor plus read access.
pub struct ArtifactHandle<'a> {
    descriptor: &'a ArtifactDescriptor,
    vfs: &'a dyn Vfs,
}

impl ArtifactHandle<'_> {
    pub fn descriptor(&self) -> &ArtifactDescriptor {
        self.descriptor
    }

    pub fn path(&self) -> &Path {
        self.descriptor.path()
    }

    pub fn scope(&self) -> ScanScope {
        self.descriptor.scope()
    }

    pub fn is_dir(&self) -> bool {
        self.vfs.is_dir(self.descriptor.path())
    }

    /// Whether the artifact contains `relative`.
    pub fn contains(&self, relative: &str) -> bool {
        self.vfs.exists(&self.descriptor.path().join(relative))
    }

    /// Read a file inside the artifact.
    pub fn read(&self, relative: &str) -> io::Result<Vec<u8>> {
        self.vfs.read(&self.descriptor.path().join(relative))
    }

    pub fn read_to_string(&self, relative: &str) -> io::Result<String> {
        self.vfs.read_to_string(&self.descriptor.path().join(relative))
    }
}

/// Per-artifact visitor.
pub trait ScanCallback {
    /// Inspect one artifact. An error is recorded and the scan moves on.
    fn visit(&mut self, artifact: &ArtifactHandle<'_>, kind: ScanKind) -> Result<(), VisitError>;
}

/// One artifact that could not be scanned.
#[derive(Debug, Error)]
#[error("{artifact:?}: {message}")]
pub struct ArtifactFailure {
    pub artifact: PathBuf,
    pub message: String,
}

/// Every artifact failure of one scan.
#[derive(Debug)]
pub struct ScanFailure {
    pub kind: ScanKind,
    pub failures: Vec<ArtifactFailure>,
    pub report: ScanReport,
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scan failed for {} artifact(s)",
            self.kind,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    /// One or more visits failed
    #[error("{0}")]
    Composite(ScanFailure),

    /// A filter pattern does not compile
    #[error("Invalid scan filter pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// The scan was cancelled between visits
    #[error("Scan cancelled after {visited} visit(s)")]
    Cancelled { visited: usize },
}

/// Counts returned by a completed scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub visited: usize,
    pub skipped: usize,
}

/// The directories one unit's scan looks at.
#[derive(Clone)]
pub struct ScanContext {
    pub unit: String,
    /// Unit-local artifact directory (`<base>/lib`)
    pub lib_dir: PathBuf,
    /// Embedded classes directory (`<base>/classes`)
    pub classes_dir: PathBuf,
    /// Shared library directories, in precedence order
    pub shared_dirs: Vec<PathBuf>,
    pub vfs: Arc<dyn Vfs>,
}

impl ScanContext {
    /// Context with the conventional `lib/` and `classes/` layout under `base`.
    pub fn for_base(unit: impl Into<String>, base: &Path, vfs: Arc<dyn Vfs>) -> Self {
        Self {
            unit: unit.into(),
            lib_dir: base.join("lib"),
            classes_dir: base.join("classes"),
            shared_dirs: Vec::new(),
            vfs,
        }
    }

    pub fn with_shared_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.shared_dirs = dirs;
        self
    }
}

impl fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanContext")
            .field("unit", &self.unit)
            .field("lib_dir", &self.lib_dir)
            .field("classes_dir", &self.classes_dir)
            .field("shared_dirs", &self.shared_dirs)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Local,
    Classes,
    Shared,
    Done,
}

/// Lazy, finite, non-restartable sequence of artifacts for one scan.
///
/// Each phase is listed only when the previous one is exhausted. Items are
/// either an artifact that passed the filter or a listing failure.
pub struct Artifacts<'a> {
    kind: ScanKind,
    context: &'a ScanContext,
    filter: &'a ScanFilter,
    phase: Phase,
    pending: VecDeque<Result<ArtifactDescriptor, ArtifactFailure>>,
    skipped: usize,
}

impl<'a> Artifacts<'a> {
    /// Artifacts rejected by the filter so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn advance_phase(&mut self) {
        self.phase = match self.phase {
            Phase::Local => {
                if self.kind.includes_classes() && self.context.vfs.is_dir(&self.context.classes_dir)
                {
                    self.pending.push_back(Ok(ArtifactDescriptor::new(
                        self.context.classes_dir.clone(),
                        ScanScope::UnitLocal,
                    )));
                }
                Phase::Classes
            }
            Phase::Classes => {
                if self.kind.includes_shared() {
                    self.pending.extend(list_shared(self.context));
                }
                Phase::Shared
            }
            Phase::Shared | Phase::Done => Phase::Done,
        };
    }
}

impl Iterator for Artifacts<'_> {
    type Item = Result<ArtifactDescriptor, ArtifactFailure>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(item) = self.pending.pop_front() {
                match item {
                    Ok(artifact) if !self.filter.check(self.kind, &artifact) => {
                        self.skipped += 1;
                        debug!(artifact = %artifact.path().display(), kind = %self.kind, "Filtered out");
                    }
                    other => return Some(other),
                }
            }
            if self.phase == Phase::Done {
                return None;
            }
            self.advance_phase();
        }
    }
}

fn list_artifacts(
    vfs: &dyn Vfs,
    dir: &Path,
    scope: ScanScope,
) -> Vec<Result<ArtifactDescriptor, ArtifactFailure>> {
    if !vfs.is_dir(dir) {
        return Vec::new();
    }
    match vfs.list_dir(dir) {
        Ok(children) => children
            .into_iter()
            .map(|path| Ok(ArtifactDescriptor::new(path, scope)))
            .collect(),
        Err(e) => vec![Err(ArtifactFailure {
            artifact: dir.to_path_buf(),
            message: format!("cannot list directory: {}", e),
        })],
    }
}

fn list_shared(context: &ScanContext) -> Vec<Result<ArtifactDescriptor, ArtifactFailure>> {
    let vfs = context.vfs.as_ref();
    context
        .shared_dirs
        .par_iter()
        .map(|dir| list_artifacts(vfs, dir, ScanScope::SharedLibrary))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Runs scans with one filter configuration.
#[derive(Debug, Clone, Default)]
pub struct ArtifactScanner {
    filter: ScanFilter,
}

impl ArtifactScanner {
    pub fn new(filter: ScanFilter) -> Self {
        Self { filter }
    }

    pub fn from_config(config: &ScanFilterConfig) -> Result<Self, ScanError> {
        Ok(Self::new(ScanFilter::new(config)?))
    }

    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// The filtered artifact sequence for `kind`, without visiting anything.
    pub fn artifacts<'a>(&'a self, kind: ScanKind, context: &'a ScanContext) -> Artifacts<'a> {
        Artifacts {
            kind,
            context,
            filter: &self.filter,
            phase: Phase::Local,
            pending: list_artifacts(context.vfs.as_ref(), &context.lib_dir, ScanScope::UnitLocal)
                .into(),
            skipped: 0,
        }
    }

    /// Visit every artifact for `kind`.
    ///
    /// Visit failures do not stop the scan; they come back together as
    /// [`ScanError::Composite`] once every artifact has been offered.
    pub fn scan(
        &self,
        kind: ScanKind,
        context: &ScanContext,
        callback: &mut dyn ScanCallback,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, ScanError> {
        let mut artifacts = self.artifacts(kind, context);
        let mut failures = Vec::new();
        let mut visited = 0;

        for item in artifacts.by_ref() {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled { visited });
            }
            let artifact = match item {
                Ok(artifact) => artifact,
                Err(failure) => {
                    warn!(unit = %context.unit, artifact = %failure.artifact.display(), "{}", failure.message);
                    failures.push(failure);
                    continue;
                }
            };

            let handle = ArtifactHandle {
                descriptor: &artifact,
                vfs: context.vfs.as_ref(),
            };
            visited += 1;
            debug!(unit = %context.unit, artifact = %artifact.path().display(), %kind, "Visiting artifact");
            if let Err(e) = callback.visit(&handle, kind) {
                warn!(
                    unit = %context.unit,
                    artifact = %artifact.path().display(),
                    %kind,
                    error = %e,
                    "Artifact scan failed"
                );
                failures.push(ArtifactFailure {
                    artifact: artifact.path().to_path_buf(),
                    message: e.to_string(),
                });
            }
        }

        let report = ScanReport {
            visited,
            skipped: artifacts.skipped(),
        };
        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ScanError::Composite(ScanFailure {
                kind,
                failures,
                report,
            }))
        }
    }
}
