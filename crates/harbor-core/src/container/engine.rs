use super::alias::{self, AliasError, AliasTable};
use super::{ContainerError, ContainerEvent, ContainerListener, ContainerNode, NodeKind};
use crate::unit::{Unit, UnitState};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::info;

/// Root of the container tree plus the host alias table.
#[derive(Debug)]
pub struct Engine {
    root: Arc<ContainerNode>,
    aliases: AliasTable,
    default_host: RwLock<Option<String>>,
    /// Held across every check-then-write on the shared host/alias namespace.
    /// Listeners fired under it must not add or remove hosts or aliases.
    names: Mutex<()>,
}

impl Engine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            root: ContainerNode::engine(name),
            aliases: AliasTable::new(),
            default_host: RwLock::new(None),
            names: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn root(&self) -> &Arc<ContainerNode> {
        &self.root
    }

    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.root.add_listener(listener);
    }

    /// Host used when a name matches neither a host nor an alias.
    pub fn set_default_host(&self, host: Option<&str>) {
        *self.default_host.write() = host.map(alias::normalize);
    }

    pub fn default_host(&self) -> Option<String> {
        self.default_host.read().clone()
    }

    pub fn add_host(&self, name: &str) -> Result<Arc<ContainerNode>, ContainerError> {
        let _names = self.names.lock();
        if let Ok(existing) = self.aliases.resolve(name) {
            return Err(AliasError::Conflict {
                alias: alias::normalize(name),
                existing,
            }
            .into());
        }
        let host = ContainerNode::host(name);
        self.root.add_child(Arc::clone(&host))?;
        info!(engine = %self.name(), host = %host.name(), "Host added");
        Ok(host)
    }

    /// Remove a host together with all of its aliases.
    pub fn remove_host(&self, name: &str) -> Result<Arc<ContainerNode>, ContainerError> {
        let _names = self.names.lock();
        let host = self.require_host(name)?;
        for alias in self.aliases.remove_host(host.name()) {
            host.fire(&ContainerEvent::AliasRemoved {
                host: host.name().to_string(),
                alias,
            });
        }
        let removed = self.root.remove_child(host.name())?;
        info!(engine = %self.name(), host = %removed.name(), "Host removed");
        Ok(removed)
    }

    pub fn host(&self, name: &str) -> Option<Arc<ContainerNode>> {
        self.root.find_child(&alias::normalize(name))
    }

    pub fn hosts(&self) -> Vec<Arc<ContainerNode>> {
        self.root.children()
    }

    fn require_host(&self, name: &str) -> Result<Arc<ContainerNode>, ContainerError> {
        self.host(name).ok_or_else(|| ContainerError::NotFound {
            parent: self.name().to_string(),
            name: name.to_string(),
        })
    }

    pub fn add_alias(&self, host: &str, alias: &str) -> Result<(), ContainerError> {
        let _names = self.names.lock();
        let node = self.require_host(host)?;
        if let Some(other) = self.host(alias) {
            return Err(AliasError::Conflict {
                alias: alias::normalize(alias),
                existing: other.name().to_string(),
            }
            .into());
        }
        if self.aliases.add(node.name(), alias)? {
            node.fire(&ContainerEvent::AliasAdded {
                host: node.name().to_string(),
                alias: alias::normalize(alias),
            });
        }
        Ok(())
    }

    /// Remove an alias of `host`. Unknown hosts and aliases are ignored.
    pub fn remove_alias(&self, host: &str, alias: &str) {
        let Some(node) = self.host(host) else {
            return;
        };
        if self.aliases.remove(node.name(), alias) {
            node.fire(&ContainerEvent::AliasRemoved {
                host: node.name().to_string(),
                alias: alias::normalize(alias),
            });
        }
    }

    pub fn resolve_alias(&self, alias: &str) -> Result<Arc<ContainerNode>, AliasError> {
        let host = self.aliases.resolve(alias)?;
        self.host(&host).ok_or_else(|| AliasError::NotFound {
            alias: alias::normalize(alias),
        })
    }

    /// Host by name, then by alias, then the default host.
    pub fn resolve_host(&self, name: &str) -> Option<Arc<ContainerNode>> {
        self.host(name)
            .or_else(|| self.resolve_alias(name).ok())
            .or_else(|| self.default_host().and_then(|d| self.host(&d)))
    }

    pub fn find_aliases(&self, host: &str) -> Vec<String> {
        self.aliases.aliases_of(host)
    }

    pub fn add_unit(&self, host: &str, unit: Arc<Unit>) -> Result<Arc<ContainerNode>, ContainerError> {
        let host = self.require_host(host)?;
        let node = ContainerNode::unit(unit);
        host.add_child(Arc::clone(&node))?;
        Ok(node)
    }

    pub fn remove_unit(&self, host: &str, name: &str) -> Result<Arc<Unit>, ContainerError> {
        let host = self.require_host(host)?;
        let node = host.remove_child(name)?;
        node.as_unit().cloned().ok_or_else(|| ContainerError::NotFound {
            parent: host.name().to_string(),
            name: name.to_string(),
        })
    }

    pub fn unit(&self, host: &str, name: &str) -> Option<Arc<Unit>> {
        self.host(host)?.find_child(name)?.as_unit().cloned()
    }

    pub fn units(&self, host: &str) -> Vec<Arc<Unit>> {
        self.host(host)
            .map(|h| {
                h.children()
                    .iter()
                    .filter(|n| n.kind() == NodeKind::Unit)
                    .filter_map(|n| n.as_unit().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Units of `host` that may receive work: only those in [`UnitState::Started`].
    pub fn routable_units(&self, host: &str) -> Vec<Arc<Unit>> {
        self.units(host)
            .into_iter()
            .filter(|u| u.state() == UnitState::Started)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_host_and_alias_cannot_share_a_name() {
        for _ in 0..64 {
            let engine = Arc::new(Engine::new("harbor"));
            engine.add_host("localhost").unwrap();
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let as_host = {
                let (engine, barrier) = (Arc::clone(&engine), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    engine.add_host("www").is_ok()
                })
            };
            let as_alias = {
                let (engine, barrier) = (Arc::clone(&engine), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    engine.add_alias("localhost", "www").is_ok()
                })
            };

            let host_added = as_host.join().unwrap();
            let alias_added = as_alias.join().unwrap();
            assert!(host_added ^ alias_added);
            assert_eq!(engine.host("www").is_some(), host_added);
            assert_eq!(engine.resolve_alias("www").is_ok(), alias_added);
        }
    }

    #[test]
    fn removing_a_host_drops_its_aliases() {
        let engine = Engine::new("harbor");
        engine.add_host("localhost").unwrap();
        engine.add_alias("localhost", "www.example.com").unwrap();
        engine.add_alias("localhost", "example.com").unwrap();

        engine.remove_host("localhost").unwrap();
        assert!(matches!(
            engine.resolve_alias("www.example.com"),
            Err(AliasError::NotFound { .. })
        ));
        assert!(engine.find_aliases("localhost").is_empty());
    }

    #[test]
    fn alias_cannot_shadow_a_host() {
        let engine = Engine::new("harbor");
        engine.add_host("localhost").unwrap();
        engine.add_host("admin").unwrap();
        assert!(engine.add_alias("localhost", "admin").is_err());

        engine.add_alias("localhost", "www").unwrap();
        assert!(matches!(
            engine.add_host("www"),
            Err(ContainerError::Alias(AliasError::Conflict { .. }))
        ));
    }

    #[test]
    fn resolve_host_falls_back_to_default() {
        let engine = Engine::new("harbor");
        engine.add_host("localhost").unwrap();
        engine.add_alias("localhost", "www").unwrap();
        assert_eq!(engine.resolve_host("WWW").unwrap().name(), "localhost");
        assert!(engine.resolve_host("unknown").is_none());

        engine.set_default_host(Some("LocalHost"));
        assert_eq!(engine.resolve_host("unknown").unwrap().name(), "localhost");
    }
}
