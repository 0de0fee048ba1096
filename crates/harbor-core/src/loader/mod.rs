//! Per-unit isolated type resolution.
//!
//! A [`ModuleLoader`] answers "give me the definition of type T" by walking an
//! ordered list of [`SourceProvider`]s. The order is data: a [`DelegationOrder`]
//! picks one of two fixed tier orderings, and the providers inside each tier keep
//! their configured order.
//!
//! | order          | walk                                        |
//! |----------------|---------------------------------------------|
//! | `SharedFirst`  | cache → bootstrap → shared → local → parent |
//! | `LocalFirst`   | cache → bootstrap → parent → local → shared |
//!
//! Loaders are generation-tagged. [`ModuleLoader::reload`] produces a fresh
//! instance with the same sources and an empty cache; holders of the previous
//! `Arc` keep a consistent (stale) view until they drop it.
//!
//! Resolution is single-writer per type name: concurrent callers for the same
//! name serialize on a per-name lock, and the cache accepts the first definition
//! only, so one definition wins per name per generation.

pub mod definition;
pub mod source;
pub mod transform;

pub use definition::{Origin, TypeDefinition, TypeManifest};
pub use source::{DirectorySource, SourceProvider, SourceSet, SourceTier, TYPE_FILE_EXTENSION};
pub use transform::{ByteTransformer, TagInjector};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Errors raised while resolving a type.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No source supplies the type
    #[error("Type not found: {type_name}")]
    NotFound { type_name: String },

    /// A unit-local source would shadow a reserved (platform-owned) type
    #[error("Ambiguous authority for reserved type {type_name}: local source '{local}' conflicts with '{authority}'")]
    Conflict {
        type_name: String,
        local: String,
        authority: String,
    },

    /// A source failed while reading
    #[error("Source '{provider}' failed reading {type_name}: {error}")]
    Source {
        provider: String,
        type_name: String,
        #[source]
        error: std::io::Error,
    },

    /// The owning unit is stopping
    #[error("Resolution of {type_name} cancelled")]
    Cancelled { type_name: String },
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound { .. })
    }
}

/// Where a unit's own sources sit relative to shared platform sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelegationOrder {
    /// Shared platform code wins; every unit sees one version.
    SharedFirst,
    /// Unit code shadows shared platform code.
    #[default]
    LocalFirst,
}

impl DelegationOrder {
    /// Tier walk order after the cache.
    pub const fn tiers(self) -> [SourceTier; 4] {
        match self {
            DelegationOrder::SharedFirst => [
                SourceTier::Bootstrap,
                SourceTier::Shared,
                SourceTier::Local,
                SourceTier::Parent,
            ],
            DelegationOrder::LocalFirst => [
                SourceTier::Bootstrap,
                SourceTier::Parent,
                SourceTier::Local,
                SourceTier::Shared,
            ],
        }
    }
}

/// Per-unit loader settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderConfig {
    pub delegation: DelegationOrder,
    /// Name prefixes that only non-local sources may define.
    pub reserved_prefixes: Vec<String>,
}

impl LoaderConfig {
    pub fn new(delegation: DelegationOrder) -> Self {
        Self {
            delegation,
            reserved_prefixes: Vec::new(),
        }
    }

    pub fn with_reserved_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reserved_prefixes.push(prefix.into());
        self
    }

    pub fn is_reserved(&self, type_name: &str) -> bool {
        self.reserved_prefixes
            .iter()
            .any(|prefix| type_name.starts_with(prefix.as_str()))
    }
}

/// Counters describing a loader's cache behaviour.
#[derive(Debug, Default)]
struct LoaderCounters {
    hits: AtomicU64,
    populations: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of the loader counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Calls answered from the cache.
    pub hits: u64,
    /// Definitions inserted into the cache.
    pub populations: u64,
    /// Calls that ended without a definition.
    pub misses: u64,
}

/// Builder for [`ModuleLoader`].
pub struct ModuleLoaderBuilder {
    unit: String,
    sources: SourceSet,
    config: LoaderConfig,
    transformers: Vec<Arc<dyn ByteTransformer>>,
    generation: u64,
}

impl ModuleLoaderBuilder {
    pub fn sources(mut self, sources: SourceSet) -> Self {
        self.sources = sources;
        self
    }

    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn ByteTransformer>) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn build(self) -> ModuleLoader {
        ModuleLoader::assemble(
            self.unit,
            self.sources,
            self.config,
            self.transformers,
            self.generation,
        )
    }
}

/// Isolated resolver for one unit and one generation.
pub struct ModuleLoader {
    unit: String,
    generation: u64,
    config: LoaderConfig,
    sources: SourceSet,
    ordered: Vec<(SourceTier, Arc<dyn SourceProvider>)>,
    transformers: Vec<Arc<dyn ByteTransformer>>,
    cache: DashMap<String, Arc<TypeDefinition>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    counters: LoaderCounters,
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("unit", &self.unit)
            .field("generation", &self.generation)
            .field("delegation", &self.config.delegation)
            .field("sources", &self.ordered.len())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl ModuleLoader {
    pub fn builder(unit: impl Into<String>) -> ModuleLoaderBuilder {
        ModuleLoaderBuilder {
            unit: unit.into(),
            sources: SourceSet::default(),
            config: LoaderConfig::default(),
            transformers: Vec::new(),
            generation: 1,
        }
    }

    fn assemble(
        unit: String,
        sources: SourceSet,
        config: LoaderConfig,
        transformers: Vec<Arc<dyn ByteTransformer>>,
        generation: u64,
    ) -> Self {
        let ordered = sources.ordered(&config.delegation.tiers());
        Self {
            unit,
            generation,
            config,
            sources,
            ordered,
            transformers,
            cache: DashMap::new(),
            locks: DashMap::new(),
            counters: LoaderCounters::default(),
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn delegation(&self) -> DelegationOrder {
        self.config.delegation
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn is_instrumented(&self) -> bool {
        !self.transformers.is_empty()
    }

    pub fn stats(&self) -> LoaderStats {
        LoaderStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            populations: self.counters.populations.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }

    pub fn is_cached(&self, type_name: &str) -> bool {
        self.cache.contains_key(type_name)
    }

    pub fn cached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Resolve a type name to its definition.
    pub fn resolve(&self, type_name: &str) -> Result<Arc<TypeDefinition>, ResolveError> {
        self.resolve_inner(type_name, None)
    }

    /// Resolve, giving up between sources once `cancel` fires.
    pub fn resolve_until(
        &self,
        type_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<TypeDefinition>, ResolveError> {
        self.resolve_inner(type_name, Some(cancel))
    }

    fn resolve_inner(
        &self,
        type_name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<TypeDefinition>, ResolveError> {
        if let Some(found) = self.cached(type_name) {
            return Ok(found);
        }

        let lock = self
            .locks
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        // Another caller may have finished while we waited.
        if let Some(found) = self.cached(type_name) {
            return Ok(found);
        }

        let located = self.locate(type_name, cancel);
        let (tier, provider, bytes) = match located {
            Ok(found) => found,
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let bytes = self
            .transformers
            .iter()
            .fold(bytes, |bytes, t| t.transform(type_name, bytes));
        let definition = Arc::new(TypeDefinition::new(
            type_name,
            bytes,
            Origin { tier, provider },
            self.generation,
        ));

        let winner = match self.cache.entry(type_name.to_string()) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                self.counters.populations.fetch_add(1, Ordering::Relaxed);
                debug!(
                    unit = %self.unit,
                    generation = self.generation,
                    type_name,
                    origin = %definition.origin(),
                    "Defined type"
                );
                Arc::clone(slot.insert(definition).value())
            }
        };
        Ok(winner)
    }

    fn cached(&self, type_name: &str) -> Option<Arc<TypeDefinition>> {
        let found = self.cache.get(type_name).map(|e| Arc::clone(e.value()));
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Walk the ordered sources. Reserved names never come from local sources.
    fn locate(
        &self,
        type_name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<(SourceTier, String, Vec<u8>), ResolveError> {
        let reserved = self.config.is_reserved(type_name);
        let mut local_claim: Option<String> = None;

        for (tier, provider) in &self.ordered {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(ResolveError::Cancelled {
                    type_name: type_name.to_string(),
                });
            }

            let fetched = provider
                .fetch(type_name)
                .map_err(|error| ResolveError::Source {
                    provider: provider.name().to_string(),
                    type_name: type_name.to_string(),
                    error,
                })?;
            let Some(bytes) = fetched else {
                continue;
            };

            if reserved && *tier == SourceTier::Local {
                if local_claim.is_none() {
                    local_claim = Some(provider.name().to_string());
                }
                continue;
            }

            if let Some(local) = local_claim {
                return Err(ResolveError::Conflict {
                    type_name: type_name.to_string(),
                    local,
                    authority: provider.name().to_string(),
                });
            }
            return Ok((*tier, provider.name().to_string(), bytes));
        }

        if let Some(local) = local_claim {
            warn!(
                unit = %self.unit,
                type_name,
                source = %local,
                "Refusing to define reserved type from a unit-local source"
            );
        }
        Err(ResolveError::NotFound {
            type_name: type_name.to_string(),
        })
    }

    /// Every type name the unit's own sources can supply, sorted.
    pub fn local_type_names(&self) -> Result<Vec<String>, ResolveError> {
        let mut names = BTreeSet::new();
        for provider in &self.sources.local {
            let listed = provider.type_names().map_err(|error| ResolveError::Source {
                provider: provider.name().to_string(),
                type_name: "*".to_string(),
                error,
            })?;
            names.extend(listed);
        }
        Ok(names.into_iter().collect())
    }

    /// Fresh loader for the next generation: same sources and hooks, empty cache.
    pub fn reload(&self) -> Arc<ModuleLoader> {
        Arc::new(ModuleLoader::assemble(
            self.unit.clone(),
            self.sources.clone(),
            self.config.clone(),
            self.transformers.clone(),
            self.generation + 1,
        ))
    }

    /// Same sources, no byte transformers, empty cache.
    ///
    /// For tooling that must see raw definitions. Shares this loader's generation tag.
    pub fn snapshot_without_instrumentation(&self) -> ModuleLoader {
        ModuleLoader::assemble(
            self.unit.clone(),
            self.sources.clone(),
            self.config.clone(),
            Vec::new(),
            self.generation,
        )
    }
}
