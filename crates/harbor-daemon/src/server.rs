//! The running server: container tree, platform and per-host pools.

use crate::deployer::HostDeployer;
use crate::error::{DaemonError, Result};
use crate::pool::WorkerPool;
use crate::watcher::DeploymentWatcher;
use harbor_common::config::{HarborConfig, ResourceSpec};
use harbor_core::container::{ContainerNode, Engine};
use harbor_core::naming::NamingResources;
use harbor_core::platform::Platform;
use harbor_core::plugin::EntryCatalog;
use harbor_core::unit::{ActivationReport, LifecycleError, Unit, UnitStatus};
use harbor_core::vfs::{OsVfs, Vfs};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of starting one unit.
#[derive(Debug)]
pub struct UnitOutcome {
    pub host: String,
    pub unit: String,
    pub result: Result<ActivationReport>,
}

impl UnitOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Row of the unit table.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub host: String,
    pub unit: String,
    pub base_path: PathBuf,
    #[serde(flatten)]
    pub status: UnitStatus,
    pub plugins: Vec<String>,
}

/// Engine, hosts and units built from a [`HarborConfig`].
pub struct Server {
    config: HarborConfig,
    engine: Arc<Engine>,
    platform: Arc<Platform>,
    pools: HashMap<String, WorkerPool>,
    watcher: Arc<DeploymentWatcher>,
    shutdown: CancellationToken,
}

impl Server {
    /// Build the server against the real file system.
    pub fn from_config(config: HarborConfig, catalog: EntryCatalog) -> Result<Self> {
        Self::with_vfs(config, catalog, Arc::new(OsVfs))
    }

    pub fn with_vfs(config: HarborConfig, catalog: EntryCatalog, vfs: Arc<dyn Vfs>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        let naming = Arc::new(NamingResources::global());
        bind_all(&naming, &config.resources)?;

        let platform = {
            let mut builder = Platform::builder(Arc::clone(&vfs))
                .catalog(catalog)
                .naming(naming);
            for root in &config.platform.bootstrap {
                builder = builder.bootstrap_root(root);
            }
            for dir in &config.platform.shared {
                builder = builder.shared_library(dir);
            }
            for root in &config.platform.parent {
                builder = builder.parent_root(root);
            }
            Arc::new(builder.build()?)
        };

        let engine = Arc::new(Engine::new(config.engine.name.as_str()));
        let watcher = Arc::new(DeploymentWatcher::new());
        engine.add_listener(watcher.clone());

        let mut pools = HashMap::new();
        for section in &config.hosts {
            let host = engine.add_host(&section.name)?;
            for alias in &section.aliases {
                engine.add_alias(host.name(), alias)?;
            }
            pools.insert(
                host.name().to_string(),
                WorkerPool::new(host.name(), section.threads(&config.platform)),
            );

            for unit_section in HostDeployer::new(section)?.units(vfs.as_ref())? {
                let unit = Unit::new(unit_section.descriptor(&section.app_base), Arc::clone(&platform));
                bind_all(unit.naming(), &unit_section.resources)?;
                engine.add_unit(host.name(), Arc::new(unit))?;
            }
        }
        engine.set_default_host(config.engine.default_host.as_deref());

        info!(
            engine = %engine.name(),
            hosts = config.hosts.len(),
            "Server assembled"
        );
        Ok(Self {
            config,
            engine,
            platform,
            pools,
            watcher,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &HarborConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn platform(&self) -> &Arc<Platform> {
        &self.platform
    }

    pub fn watcher(&self) -> &Arc<DeploymentWatcher> {
        &self.watcher
    }

    /// Cancelled as soon as [`Server::stop`] begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn pool(&self, host: &str) -> Option<&WorkerPool> {
        self.pools.get(&host.to_ascii_lowercase())
    }

    /// Canonical host name for a host name or alias.
    pub fn resolve_host(&self, name: &str) -> Option<String> {
        self.engine.resolve_host(name).map(|h| h.name().to_string())
    }

    fn require_host(&self, name: &str) -> Result<(Arc<ContainerNode>, WorkerPool)> {
        let host = self
            .engine
            .resolve_host(name)
            .ok_or_else(|| DaemonError::UnknownHost(name.to_string()))?;
        let pool = self
            .pools
            .get(host.name())
            .cloned()
            .ok_or_else(|| DaemonError::UnknownHost(name.to_string()))?;
        Ok((host, pool))
    }

    pub fn unit(&self, host: &str, unit: &str) -> Result<Arc<Unit>> {
        let (node, _) = self.require_host(host)?;
        self.engine
            .unit(node.name(), unit)
            .ok_or_else(|| DaemonError::UnknownUnit {
                host: node.name().to_string(),
                unit: unit.to_string(),
            })
    }

    /// Every unit with its host, in tree order.
    pub fn units(&self) -> Vec<(String, Arc<Unit>)> {
        self.engine
            .hosts()
            .iter()
            .flat_map(|host| {
                self.engine
                    .units(host.name())
                    .into_iter()
                    .map(|unit| (host.name().to_string(), unit))
            })
            .collect()
    }

    pub fn routable_units(&self, host: &str) -> Vec<Arc<Unit>> {
        self.engine
            .resolve_host(host)
            .map(|h| self.engine.routable_units(h.name()))
            .unwrap_or_default()
    }

    /// Activate every unit on its host's pool. Outcomes come back in tree order.
    ///
    /// Activations still queued for a slot when [`Server::stop`] runs are
    /// skipped and report [`LifecycleError::Cancelled`].
    pub async fn start(&self) -> Vec<UnitOutcome> {
        let mut tasks = JoinSet::new();
        let units = self.units();
        for (index, (host, unit)) in units.iter().enumerate() {
            let Some(pool) = self.pools.get(host).cloned() else {
                continue;
            };
            let unit = Arc::clone(unit);
            let shutdown = self.shutdown.clone();
            tasks.spawn(async move {
                let job = move || -> std::result::Result<ActivationReport, LifecycleError> {
                    let cancelled = || LifecycleError::Cancelled {
                        unit: unit.name().to_string(),
                    };
                    if shutdown.is_cancelled() {
                        return Err(cancelled());
                    }
                    let report = unit.activate()?;
                    // Shutdown may have stopped this unit before it reached Starting.
                    if shutdown.is_cancelled() {
                        unit.stop();
                        return Err(cancelled());
                    }
                    Ok(report)
                };
                let result = match pool.run(job).await {
                    Ok(activated) => activated.map_err(DaemonError::from),
                    Err(err) => Err(err),
                };
                (index, result)
            });
        }

        let mut results: HashMap<usize, Result<ActivationReport>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    results.insert(index, result);
                }
                Err(err) => warn!(error = %err, "Start task did not complete"),
            }
        }

        let mut outcomes = Vec::with_capacity(units.len());
        for (index, (host, unit)) in units.into_iter().enumerate() {
            let result = results
                .remove(&index)
                .unwrap_or_else(|| Err(anyhow::anyhow!("start task for '{}' did not complete", unit.name()).into()));
            match &result {
                Ok(report) => debug!(
                    host = %host,
                    unit = %unit.name(),
                    generation = report.generation,
                    plugins = report.plugins.len(),
                    "Unit started"
                ),
                Err(err) => warn!(host = %host, unit = %unit.name(), error = %err, "Unit failed to start"),
            }
            outcomes.push(UnitOutcome {
                host,
                unit: unit.name().to_string(),
                result,
            });
        }
        outcomes
    }

    /// Signal shutdown and stop every unit.
    ///
    /// Stops bypass the host pools, so a unit that is still activating is
    /// cancelled instead of waiting behind the activations holding its slots.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut tasks = JoinSet::new();
        for (_, unit) in self.units() {
            tasks.spawn_blocking(move || unit.stop());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "Stop task did not complete");
            }
        }
        info!(engine = %self.engine.name(), "Server stopped");
    }

    /// Reload one unit on its host's pool.
    pub async fn reload(&self, host: &str, unit: &str) -> Result<ActivationReport> {
        let (_, pool) = self.require_host(host)?;
        let unit = self.unit(host, unit)?;
        let report = pool.run(move || unit.reload()).await??;
        Ok(report)
    }

    pub fn summaries(&self) -> Vec<UnitSummary> {
        self.units()
            .into_iter()
            .map(|(host, unit)| UnitSummary {
                host,
                unit: unit.name().to_string(),
                base_path: unit.base_path().to_path_buf(),
                status: unit.status(),
                plugins: unit.active_plugins(),
            })
            .collect()
    }
}

fn bind_all(naming: &NamingResources, resources: &[ResourceSpec]) -> Result<()> {
    for resource in resources {
        naming.bind(resource.name.clone(), resource.binding.clone())?;
    }
    Ok(())
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("engine", &self.engine.name())
            .field("hosts", &self.pools.keys().collect::<Vec<_>>())
            .field("platform", &self.platform)
            .finish()
    }
}
