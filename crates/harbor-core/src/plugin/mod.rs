//! Plugin registry: declared extensions, their interest sets and activation.

pub mod discovery;

pub use discovery::{PLUGIN_MANIFEST, PluginDiscovery, PluginManifest};

use crate::loader::{ModuleLoader, ResolveError, TypeDefinition};
use crate::naming::NamingResources;
use crate::scan::ScanScope;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type plugin entries return.
pub type EntryError = Box<dyn std::error::Error + Send + Sync>;

/// Failures that abort a unit's activation.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A plugin entry point reported failure
    #[error("Plugin '{plugin}' failed to activate: {error}")]
    Plugin {
        plugin: String,
        #[source]
        error: EntryError,
    },

    /// No native implementation is registered for a declared entry
    #[error("No entry implementation registered for plugin '{plugin}'")]
    MissingEntry { plugin: String },

    /// Activation stopped because the unit is stopping
    #[error("Plugin activation cancelled before '{plugin}'")]
    Cancelled { plugin: String },
}

/// Predicate selecting types a plugin wants to see.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeMatcher {
    /// The type with exactly this name
    Exact(String),
    /// Any strict, transitive subtype of the named type
    SubtypeOf(String),
    /// Any type carrying the tag
    Tagged(String),
}

impl TypeMatcher {
    pub fn matches(&self, definition: &TypeDefinition, loader: &ModuleLoader) -> bool {
        match self {
            TypeMatcher::Exact(name) => definition.name() == name,
            TypeMatcher::SubtypeOf(ancestor) => is_subtype(definition, ancestor, loader),
            TypeMatcher::Tagged(tag) => definition.has_tag(tag),
        }
    }
}

impl fmt::Display for TypeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeMatcher::Exact(name) => write!(f, "exact {}", name),
            TypeMatcher::SubtypeOf(name) => write!(f, "subtype-of {}", name),
            TypeMatcher::Tagged(tag) => write!(f, "tagged {}", tag),
        }
    }
}

/// Walk `extends` breadth-first. Supertypes that do not resolve end their branch.
fn is_subtype(definition: &TypeDefinition, ancestor: &str, loader: &ModuleLoader) -> bool {
    let mut queue: VecDeque<String> = definition.extends().iter().cloned().collect();
    let mut seen = HashSet::new();
    while let Some(parent) = queue.pop_front() {
        if parent == ancestor {
            return true;
        }
        if !seen.insert(parent.clone()) {
            continue;
        }
        if let Ok(resolved) = loader.resolve(&parent) {
            queue.extend(resolved.extends().iter().cloned());
        }
    }
    false
}

/// A discovered extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    /// Entry type name; also the key into the [`EntryCatalog`]
    pub entry: String,
    /// Interest predicates; empty means "activate with an empty set"
    pub interest: Vec<TypeMatcher>,
    /// Artifact the declaration came from
    pub artifact: Option<PathBuf>,
    pub scope: ScanScope,
}

impl PluginDescriptor {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            interest: Vec::new(),
            artifact: None,
            scope: ScanScope::UnitLocal,
        }
    }

    pub fn with_interest(mut self, matcher: TypeMatcher) -> Self {
        self.interest.push(matcher);
        self
    }
}

/// The types handed to one plugin, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct InterestSet {
    types: BTreeMap<String, Arc<TypeDefinition>>,
}

impl InterestSet {
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<TypeDefinition>> {
        self.types.get(type_name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TypeDefinition>> {
        self.types.values()
    }
}

/// Handle given to plugin entries during activation.
pub struct UnitContext {
    unit: String,
    base_path: PathBuf,
    loader: Arc<ModuleLoader>,
    naming: Arc<NamingResources>,
    attributes: RwLock<IndexMap<String, String>>,
}

impl UnitContext {
    pub fn new(
        unit: impl Into<String>,
        base_path: impl Into<PathBuf>,
        loader: Arc<ModuleLoader>,
        naming: Arc<NamingResources>,
    ) -> Self {
        Self {
            unit: unit.into(),
            base_path: base_path.into(),
            loader,
            naming,
            attributes: RwLock::new(IndexMap::new()),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn generation(&self) -> u64 {
        self.loader.generation()
    }

    pub fn loader(&self) -> &Arc<ModuleLoader> {
        &self.loader
    }

    pub fn naming(&self) -> &NamingResources {
        &self.naming
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.write().insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.read().get(key).cloned()
    }

    pub fn attributes(&self) -> IndexMap<String, String> {
        self.attributes.read().clone()
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("unit", &self.unit)
            .field("base_path", &self.base_path)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Native implementation behind a plugin declaration.
pub trait PluginEntry: Send + Sync {
    /// Called once per unit activation with the plugin's interest set.
    fn on_activate(&self, interest: &InterestSet, context: &UnitContext) -> Result<(), EntryError>;

    /// Called when the unit stops or reloads, in reverse activation order.
    fn on_deactivate(&self, _context: &UnitContext) {}
}

/// Entry name to implementation. Shared by every unit of a platform.
#[derive(Clone, Default)]
pub struct EntryCatalog {
    entries: HashMap<String, Arc<dyn PluginEntry>>,
}

impl EntryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: Arc<dyn PluginEntry>) {
        self.entries.insert(name.into(), entry);
    }

    pub fn with(mut self, name: impl Into<String>, entry: Arc<dyn PluginEntry>) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginEntry>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for EntryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryCatalog")
            .field("entries", &self.names())
            .finish()
    }
}

/// One successfully activated plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub plugin: String,
    pub interest: Vec<String>,
}

/// Plugins discovered for one unit activation, in discovery order.
#[derive(Default)]
pub struct PluginRegistry {
    descriptors: IndexMap<String, PluginDescriptor>,
    active: Vec<(String, Arc<dyn PluginEntry>)>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("descriptors", &self.descriptors)
            .field("active", &self.active_plugins())
            .finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor. Returns `false` when the entry was already registered.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> bool {
        if let Some(existing) = self.descriptors.get(&descriptor.entry) {
            debug!(
                plugin = %descriptor.entry,
                kept = ?existing.artifact,
                ignored = ?descriptor.artifact,
                "Duplicate plugin declaration"
            );
            return false;
        }
        debug!(plugin = %descriptor.entry, artifact = ?descriptor.artifact, "Registered plugin");
        self.descriptors
            .insert(descriptor.entry.clone(), descriptor);
        true
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.descriptors.values()
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    /// The part of `universe` a descriptor is interested in.
    pub fn interest_for(
        &self,
        descriptor: &PluginDescriptor,
        universe: &[Arc<TypeDefinition>],
        loader: &ModuleLoader,
    ) -> InterestSet {
        if descriptor.interest.is_empty() {
            return InterestSet::default();
        }
        let types = universe
            .iter()
            .filter(|def| descriptor.interest.iter().any(|m| m.matches(def, loader)))
            .map(|def| (def.name().to_string(), Arc::clone(def)))
            .collect();
        InterestSet { types }
    }

    /// Invoke every registered plugin once, in registration order.
    ///
    /// The first failure aborts activation; plugins already activated are
    /// deactivated again before the error is returned.
    pub fn activate(
        &mut self,
        context: &UnitContext,
        universe: &[Arc<TypeDefinition>],
        catalog: &EntryCatalog,
        cancel: &CancellationToken,
    ) -> Result<Vec<Activation>, StartupError> {
        let mut activations = Vec::with_capacity(self.descriptors.len());
        let plan: Vec<(String, InterestSet)> = self
            .descriptors
            .values()
            .map(|d| (d.entry.clone(), self.interest_for(d, universe, context.loader())))
            .collect();

        for (plugin, interest) in plan {
            let outcome = if cancel.is_cancelled() {
                Err(StartupError::Cancelled {
                    plugin: plugin.clone(),
                })
            } else {
                self.activate_one(&plugin, &interest, context, catalog)
            };
            match outcome {
                Ok(entry) => {
                    info!(
                        unit = %context.unit(),
                        plugin = %plugin,
                        interest = interest.len(),
                        "Activated plugin"
                    );
                    activations.push(Activation {
                        plugin: plugin.clone(),
                        interest: interest.names().map(str::to_string).collect(),
                    });
                    self.active.push((plugin, entry));
                }
                Err(e) => {
                    warn!(unit = %context.unit(), plugin = %plugin, error = %e, "Plugin activation failed");
                    self.deactivate(context);
                    return Err(e);
                }
            }
        }
        Ok(activations)
    }

    fn activate_one(
        &self,
        plugin: &str,
        interest: &InterestSet,
        context: &UnitContext,
        catalog: &EntryCatalog,
    ) -> Result<Arc<dyn PluginEntry>, StartupError> {
        let entry = catalog.get(plugin).ok_or_else(|| StartupError::MissingEntry {
            plugin: plugin.to_string(),
        })?;
        entry
            .on_activate(interest, context)
            .map_err(|error| StartupError::Plugin {
                plugin: plugin.to_string(),
                error,
            })?;
        Ok(entry)
    }

    /// Deactivate active plugins, newest first.
    pub fn deactivate(&mut self, context: &UnitContext) {
        while let Some((plugin, entry)) = self.active.pop() {
            debug!(unit = %context.unit(), plugin = %plugin, "Deactivating plugin");
            entry.on_deactivate(context);
        }
    }

    pub fn active_plugins(&self) -> Vec<String> {
        self.active.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Resolve each registered entry type, failing on the first that does not resolve.
pub fn resolve_entries(
    registry: &PluginRegistry,
    loader: &ModuleLoader,
    cancel: &CancellationToken,
) -> Result<(), ResolveError> {
    for descriptor in registry.descriptors() {
        loader.resolve_until(&descriptor.entry, cancel)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{DirectorySource, SourceSet, SourceTier};
    use crate::vfs::MemoryVfs;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Vec<String>>>,
        deactivated: Mutex<usize>,
    }

    impl PluginEntry for Recording {
        fn on_activate(&self, interest: &InterestSet, _context: &UnitContext) -> Result<(), EntryError> {
            self.seen
                .lock()
                .push(interest.names().map(str::to_string).collect());
            Ok(())
        }

        fn on_deactivate(&self, _context: &UnitContext) {
            *self.deactivated.lock() += 1;
        }
    }

    struct Failing;

    impl PluginEntry for Failing {
        fn on_activate(&self, _: &InterestSet, _: &UnitContext) -> Result<(), EntryError> {
            Err("database unreachable".into())
        }
    }

    fn context() -> (UnitContext, Vec<Arc<TypeDefinition>>) {
        let vfs: Arc<dyn crate::vfs::Vfs> = Arc::new(
            MemoryVfs::new()
                .with_file("/u/web/Handler.type", "{}")
                .with_file("/u/web/BaseHandler.type", r#"{"extends": ["web.Handler"]}"#)
                .with_file("/u/app/X1.type", r#"{"extends": ["web.BaseHandler"], "tags": ["Route"]}"#)
                .with_file("/u/app/Y1.type", r#"{"extends": ["app.Other"]}"#),
        );
        let loader = Arc::new(
            ModuleLoader::builder("shop")
                .sources(SourceSet::new().with(SourceTier::Local, Arc::new(DirectorySource::new("u", "/u", vfs))))
                .build(),
        );
        let universe = ["app.X1", "app.Y1"]
            .iter()
            .map(|n| loader.resolve(n).unwrap())
            .collect();
        let context = UnitContext::new("shop", "/apps/shop", loader, Arc::new(NamingResources::global()));
        (context, universe)
    }

    #[test]
    fn subtype_interest_is_transitive_and_strict() {
        let (context, universe) = context();
        let registry = PluginRegistry::new();
        let descriptor = PluginDescriptor::new("p").with_interest(TypeMatcher::SubtypeOf("web.Handler".into()));
        let set = registry.interest_for(&descriptor, &universe, context.loader());
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["app.X1"]);

        let exact = PluginDescriptor::new("p").with_interest(TypeMatcher::SubtypeOf("app.X1".into()));
        assert!(registry.interest_for(&exact, &universe, context.loader()).is_empty());
    }

    #[test]
    fn plugins_without_interest_still_activate_once() {
        let (context, universe) = context();
        let entry = Arc::new(Recording::default());
        let catalog = EntryCatalog::new().with("p", entry.clone());
        let mut registry = PluginRegistry::new();
        assert!(registry.register(PluginDescriptor::new("p")));
        assert!(!registry.register(PluginDescriptor::new("p").with_interest(TypeMatcher::Tagged("Route".into()))));

        let activations = registry
            .activate(&context, &universe, &catalog, &CancellationToken::new())
            .unwrap();
        assert_eq!(activations.len(), 1);
        assert_eq!(*entry.seen.lock(), vec![Vec::<String>::new()]);
    }

    #[test]
    fn failing_entry_rolls_back_earlier_plugins() {
        let (context, universe) = context();
        let first = Arc::new(Recording::default());
        let catalog = EntryCatalog::new()
            .with("first", first.clone())
            .with("broken", Arc::new(Failing));
        let mut registry = PluginRegistry::new();
        registry.register(PluginDescriptor::new("first"));
        registry.register(PluginDescriptor::new("broken"));

        let err = registry
            .activate(&context, &universe, &catalog, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, StartupError::Plugin { ref plugin, .. } if plugin == "broken"));
        assert_eq!(*first.deactivated.lock(), 1);
        assert!(registry.active_plugins().is_empty());
    }

    #[test]
    fn missing_catalog_entry_is_fatal() {
        let (context, universe) = context();
        let mut registry = PluginRegistry::new();
        registry.register(PluginDescriptor::new("ghost"));
        let err = registry
            .activate(&context, &universe, &EntryCatalog::new(), &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, StartupError::MissingEntry { .. }));
    }
}
