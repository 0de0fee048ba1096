//! Unit lifecycle.
//!
//! ```text
//! Stopped ──activate──▶ Starting ──▶ Started ──stop──▶ Stopping ──▶ Stopped
//!    ▲                     │  │          │
//!    └──── cancelled ──────┘  └─▶ Failed ◀┘
//! ```
//!
//! Activation runs its steps strictly in order on the calling thread: build a
//! fresh loader, scan for plugins, register them, resolve bootstrap and entry
//! types, resolve the local type universe, then activate plugins. Calling
//! [`Unit::stop`] while a unit is starting cancels the in-flight step; the
//! activating caller then sees [`LifecycleError::Cancelled`] and the unit ends
//! up `Stopped`.

use crate::loader::{DelegationOrder, LoaderConfig, ModuleLoader, ResolveError, TypeDefinition};
use crate::naming::NamingResources;
use crate::platform::Platform;
use crate::plugin::{self, Activation, PluginDiscovery, PluginRegistry, StartupError, UnitContext};
use crate::scan::{ArtifactScanner, ScanContext, ScanError, ScanFilterConfig, ScanKind};
use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Unit '{unit}' cannot {operation} while {state}")]
    InvalidTransition {
        unit: String,
        state: UnitState,
        operation: &'static str,
    },

    #[error("Activation of unit '{unit}' was cancelled")]
    Cancelled { unit: String },

    #[error("Unit '{unit}' sources could not be listed: {error}")]
    Sources {
        unit: String,
        #[source]
        error: std::io::Error,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Startup(#[from] StartupError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitState {
    Stopped,
    Starting,
    Started,
    Stopping,
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UnitState::Stopped => "stopped",
            UnitState::Starting => "starting",
            UnitState::Started => "started",
            UnitState::Stopping => "stopping",
            UnitState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Everything needed to activate a unit, already parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDescriptor {
    pub name: String,
    pub base_path: PathBuf,
    pub delegation: DelegationOrder,
    /// Type name prefixes unit-local sources may not define
    pub reserved_prefixes: Vec<String>,
    /// Types that must resolve before plugins are activated
    pub bootstrap_types: Vec<String>,
    pub scan: ScanFilterConfig,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into(),
            delegation: DelegationOrder::default(),
            reserved_prefixes: Vec::new(),
            bootstrap_types: Vec::new(),
            scan: ScanFilterConfig::default(),
        }
    }

    pub fn with_delegation(mut self, delegation: DelegationOrder) -> Self {
        self.delegation = delegation;
        self
    }

    pub fn with_reserved_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reserved_prefixes.push(prefix.into());
        self
    }

    pub fn with_bootstrap_type(mut self, type_name: impl Into<String>) -> Self {
        self.bootstrap_types.push(type_name.into());
        self
    }

    pub fn with_scan(mut self, scan: ScanFilterConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            delegation: self.delegation,
            reserved_prefixes: self.reserved_prefixes.clone(),
        }
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    Starting,
    Started { generation: u64 },
    Stopped,
    Failed { error: String },
    Reloaded { generation: u64 },
}

pub trait UnitListener: Send + Sync {
    fn unit_event(&self, unit: &Unit, event: &UnitEvent);
}

/// Inspectable snapshot of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitStatus {
    pub state: UnitState,
    pub last_error: Option<String>,
    /// Generation of the active loader, if any
    pub generation: Option<u64>,
}

/// Outcome of a successful activation or reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub generation: u64,
    pub artifacts_visited: usize,
    pub artifacts_skipped: usize,
    pub types: usize,
    pub plugins: Vec<Activation>,
}

#[derive(Debug)]
struct StatusCell {
    state: UnitState,
    last_error: Option<String>,
}

struct Activated {
    report: ActivationReport,
    registry: PluginRegistry,
    context: Arc<UnitContext>,
}

/// A deployable application scope.
pub struct Unit {
    descriptor: UnitDescriptor,
    platform: Arc<Platform>,
    naming: Arc<NamingResources>,
    status: RwLock<StatusCell>,
    loader: ArcSwapOption<ModuleLoader>,
    context: ArcSwapOption<UnitContext>,
    generations: AtomicU64,
    cancel: Mutex<CancellationToken>,
    registry: Mutex<Option<PluginRegistry>>,
    listeners: RwLock<Vec<Arc<dyn UnitListener>>>,
}

impl Unit {
    pub fn new(descriptor: UnitDescriptor, platform: Arc<Platform>) -> Self {
        let naming = Arc::new(NamingResources::new(
            descriptor.name.clone(),
            Some(Arc::clone(platform.naming())),
        ));
        Self {
            descriptor,
            platform,
            naming,
            status: RwLock::new(StatusCell {
                state: UnitState::Stopped,
                last_error: None,
            }),
            loader: ArcSwapOption::empty(),
            context: ArcSwapOption::empty(),
            generations: AtomicU64::new(0),
            cancel: Mutex::new(CancellationToken::new()),
            registry: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn base_path(&self) -> &Path {
        &self.descriptor.base_path
    }

    pub fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    /// Bindings owned by this unit. They outlive loader generations.
    pub fn naming(&self) -> &Arc<NamingResources> {
        &self.naming
    }

    pub fn state(&self) -> UnitState {
        self.status.read().state
    }

    pub fn status(&self) -> UnitStatus {
        let status = self.status.read();
        UnitStatus {
            state: status.state,
            last_error: status.last_error.clone(),
            generation: self.loader.load_full().map(|l| l.generation()),
        }
    }

    pub fn is_routable(&self) -> bool {
        self.state() == UnitState::Started
    }

    /// The active loader. `None` unless starting or started.
    pub fn loader(&self) -> Option<Arc<ModuleLoader>> {
        self.loader.load_full()
    }

    pub fn context(&self) -> Option<Arc<UnitContext>> {
        self.context.load_full()
    }

    pub fn active_plugins(&self) -> Vec<String> {
        self.registry
            .lock()
            .as_ref()
            .map(PluginRegistry::active_plugins)
            .unwrap_or_default()
    }

    pub fn add_listener(&self, listener: Arc<dyn UnitListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, event: UnitEvent) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.unit_event(self, &event);
        }
    }

    /// Move into `Starting` from one of `from`, arming a fresh cancellation token.
    fn enter_starting(
        &self,
        from: &[UnitState],
        operation: &'static str,
    ) -> Result<CancellationToken, LifecycleError> {
        let mut status = self.status.write();
        if !from.contains(&status.state) {
            return Err(LifecycleError::InvalidTransition {
                unit: self.name().to_string(),
                state: status.state,
                operation,
            });
        }
        status.state = UnitState::Starting;
        status.last_error = None;
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        Ok(token)
    }

    /// Activate from `Stopped` or `Failed`.
    pub fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        let cancel = self.enter_starting(&[UnitState::Stopped, UnitState::Failed], "activate")?;
        info!(unit = %self.name(), "Starting unit");
        self.notify(UnitEvent::Starting);

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self
            .build_loader(generation)
            .and_then(|loader| self.run_steps(loader, &cancel));
        self.finish(outcome, &cancel)
    }

    /// Swap in a fresh loader generation and activate again. Bindings are kept.
    ///
    /// A [`Unit::stop`] that lands before the new generation starts ends the
    /// reload in `Stopped` with [`LifecycleError::Cancelled`].
    pub fn reload(&self) -> Result<ActivationReport, LifecycleError> {
        let cancel = CancellationToken::new();
        {
            let mut status = self.status.write();
            if status.state != UnitState::Started {
                return Err(LifecycleError::InvalidTransition {
                    unit: self.name().to_string(),
                    state: status.state,
                    operation: "reload",
                });
            }
            status.state = UnitState::Stopping;
            *self.cancel.lock() = cancel.clone();
        }
        self.deactivate_plugins();
        let previous = self.loader.load_full();

        {
            let mut status = self.status.write();
            if cancel.is_cancelled() {
                drop(status);
                return Err(self.cancelled());
            }
            status.state = UnitState::Starting;
            status.last_error = None;
        }
        info!(unit = %self.name(), "Reloading unit");
        self.notify(UnitEvent::Starting);

        let outcome = match previous {
            Some(previous) => {
                let next = previous.reload();
                self.generations.fetch_max(next.generation(), Ordering::SeqCst);
                self.run_steps(next, &cancel)
            }
            None => {
                let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
                self.build_loader(generation)
                    .and_then(|loader| self.run_steps(loader, &cancel))
            }
        };
        let report = self.finish(outcome, &cancel)?;
        self.notify(UnitEvent::Reloaded {
            generation: report.generation,
        });
        Ok(report)
    }

    /// Stop the unit. While starting or reloading, this only cancels the
    /// activation in flight.
    pub fn stop(&self) {
        {
            let mut status = self.status.write();
            match status.state {
                UnitState::Stopped => return,
                UnitState::Stopping => {
                    // Only a reload arms this token while stopping.
                    self.cancel.lock().cancel();
                    return;
                }
                UnitState::Starting => {
                    info!(unit = %self.name(), "Cancelling activation");
                    self.cancel.lock().cancel();
                    return;
                }
                UnitState::Started | UnitState::Failed => status.state = UnitState::Stopping,
            }
        }
        info!(unit = %self.name(), "Stopping unit");
        self.deactivate_plugins();
        self.release();
        self.status.write().state = UnitState::Stopped;
        self.notify(UnitEvent::Stopped);
    }

    fn build_loader(&self, generation: u64) -> Result<Arc<ModuleLoader>, LifecycleError> {
        let sources = self
            .platform
            .unit_sources(self.base_path())
            .map_err(|error| LifecycleError::Sources {
                unit: self.name().to_string(),
                error,
            })?;
        let builder = ModuleLoader::builder(self.name())
            .sources(sources)
            .config(self.descriptor.loader_config())
            .generation(generation);
        let builder = self
            .platform
            .transformers()
            .iter()
            .fold(builder, |b, t| b.transformer(Arc::clone(t)));
        Ok(Arc::new(builder.build()))
    }

    fn run_steps(&self, loader: Arc<ModuleLoader>, cancel: &CancellationToken) -> Result<Activated, LifecycleError> {
        self.loader.store(Some(Arc::clone(&loader)));
        debug!(unit = %self.name(), generation = loader.generation(), "Loader created");

        let scanner = ArtifactScanner::from_config(&self.descriptor.scan)?;
        let scan_context = ScanContext::for_base(self.name(), self.base_path(), Arc::clone(self.platform.vfs()))
            .with_shared_dirs(self.platform.shared_dirs().to_vec());
        let mut discovery = PluginDiscovery::new();
        let scan = scanner.scan(ScanKind::Plugin, &scan_context, &mut discovery, cancel)?;
        let mut registry = discovery.into_registry();
        debug!(unit = %self.name(), plugins = registry.len(), visited = scan.visited, "Plugin scan complete");

        for type_name in &self.descriptor.bootstrap_types {
            loader.resolve_until(type_name, cancel)?;
        }
        plugin::resolve_entries(&registry, &loader, cancel)?;
        let universe = self.type_universe(&loader, cancel)?;

        let context = Arc::new(UnitContext::new(
            self.name(),
            self.base_path(),
            Arc::clone(&loader),
            Arc::clone(&self.naming),
        ));
        let plugins = registry.activate(&context, &universe, self.platform.catalog(), cancel)?;

        Ok(Activated {
            report: ActivationReport {
                generation: loader.generation(),
                artifacts_visited: scan.visited,
                artifacts_skipped: scan.skipped,
                types: universe.len(),
                plugins,
            },
            registry,
            context,
        })
    }

    /// Every type the unit's own sources supply, as the loader resolves it.
    ///
    /// Reserved names a unit supplies only locally are left out.
    fn type_universe(
        &self,
        loader: &ModuleLoader,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<TypeDefinition>>, LifecycleError> {
        let names = loader.local_type_names()?;
        let mut universe = Vec::with_capacity(names.len());
        for type_name in names {
            match loader.resolve_until(&type_name, cancel) {
                Ok(definition) => universe.push(definition),
                Err(e) if e.is_not_found() => {
                    debug!(unit = %self.name(), type_name = %type_name, "Left out of type universe");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(universe)
    }

    fn finish(
        &self,
        outcome: Result<Activated, LifecycleError>,
        cancel: &CancellationToken,
    ) -> Result<ActivationReport, LifecycleError> {
        match outcome {
            Ok(started) => {
                let mut status = self.status.write();
                if cancel.is_cancelled() {
                    drop(status);
                    let Activated {
                        mut registry,
                        context,
                        ..
                    } = started;
                    registry.deactivate(&context);
                    return Err(self.cancelled());
                }
                let report = started.report;
                *self.registry.lock() = Some(started.registry);
                self.context.store(Some(started.context));
                status.state = UnitState::Started;
                drop(status);

                info!(
                    unit = %self.name(),
                    generation = report.generation,
                    plugins = report.plugins.len(),
                    types = report.types,
                    "Unit started"
                );
                self.notify(UnitEvent::Started {
                    generation: report.generation,
                });
                Ok(report)
            }
            Err(_) if cancel.is_cancelled() => Err(self.cancelled()),
            Err(e) => {
                self.release();
                {
                    let mut status = self.status.write();
                    status.state = UnitState::Failed;
                    status.last_error = Some(e.to_string());
                }
                warn!(unit = %self.name(), error = %e, "Unit failed to start");
                self.notify(UnitEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn cancelled(&self) -> LifecycleError {
        self.release();
        self.status.write().state = UnitState::Stopped;
        info!(unit = %self.name(), "Activation cancelled");
        self.notify(UnitEvent::Stopped);
        LifecycleError::Cancelled {
            unit: self.name().to_string(),
        }
    }

    fn deactivate_plugins(&self) {
        let registry = self.registry.lock().take();
        if let (Some(mut registry), Some(context)) = (registry, self.context.load_full()) {
            registry.deactivate(&context);
        }
    }

    /// Drop this unit's references to the current loader generation.
    fn release(&self) {
        self.context.store(None);
        self.loader.store(None);
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("name", &self.descriptor.name)
            .field("base_path", &self.descriptor.base_path)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{EntryError, InterestSet, PluginEntry};
    use crate::vfs::MemoryVfs;

    struct Noop;

    impl PluginEntry for Noop {
        fn on_activate(&self, _: &InterestSet, _: &UnitContext) -> Result<(), EntryError> {
            Ok(())
        }
    }

    fn platform() -> Arc<Platform> {
        let vfs = MemoryVfs::new()
            .with_file("/apps/shop/classes/shop/Main.type", "{}")
            .with_file("/apps/shop/lib/acme/acme/Init.type", "{}")
            .with_file(
                "/apps/shop/lib/acme/plugins.toml",
                "[[plugin]]\nentry = \"acme.Init\"\n",
            );
        Arc::new(
            Platform::builder(Arc::new(vfs))
                .entry("acme.Init", Arc::new(Noop))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn activation_reaches_started() {
        let unit = Unit::new(
            UnitDescriptor::new("shop", "/apps/shop").with_bootstrap_type("shop.Main"),
            platform(),
        );
        let report = unit.activate().unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.types, 2);
        assert_eq!(unit.state(), UnitState::Started);
        assert_eq!(unit.active_plugins(), vec!["acme.Init"]);
    }

    #[test]
    fn activate_twice_is_rejected() {
        let unit = Unit::new(UnitDescriptor::new("shop", "/apps/shop"), platform());
        unit.activate().unwrap();
        assert!(matches!(
            unit.activate(),
            Err(LifecycleError::InvalidTransition { state: UnitState::Started, .. })
        ));
    }

    #[test]
    fn missing_bootstrap_type_fails_and_retry_is_allowed() {
        let unit = Unit::new(
            UnitDescriptor::new("shop", "/apps/shop").with_bootstrap_type("shop.Missing"),
            platform(),
        );
        assert!(matches!(unit.activate(), Err(LifecycleError::Resolve(_))));
        let status = unit.status();
        assert_eq!(status.state, UnitState::Failed);
        assert!(status.last_error.unwrap().contains("shop.Missing"));
        assert!(unit.loader().is_none());

        assert!(unit.activate().is_err());
        assert_eq!(unit.state(), UnitState::Failed);
    }

    #[test]
    fn stop_releases_the_loader() {
        let unit = Unit::new(UnitDescriptor::new("shop", "/apps/shop"), platform());
        unit.activate().unwrap();
        let loader = unit.loader().unwrap();
        unit.stop();
        assert_eq!(unit.state(), UnitState::Stopped);
        assert!(unit.loader().is_none());
        assert_eq!(Arc::strong_count(&loader), 1);
    }
}
