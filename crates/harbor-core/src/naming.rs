//! Externally bound resources: environment values, resource handles and links.
//!
//! Each unit owns one [`NamingResources`]; the process owns another. Links in a
//! unit scope point at names in the process scope.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("Name '{name}' is not bound in {scope}")]
    NotFound { scope: String, name: String },

    #[error("Name '{name}' is already bound in {scope}")]
    DuplicateName { scope: String, name: String },

    #[error("Link '{name}' points at '{target}', which is not bound")]
    DanglingLink { name: String, target: String },

    #[error("Link cycle through '{name}'")]
    LinkCycle { name: String },
}

/// One bound name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceBinding {
    /// A typed scalar value
    Environment {
        #[serde(rename = "type")]
        value_type: String,
        value: String,
    },
    /// A handle to a shared resource, described by its type and settings
    Resource {
        #[serde(rename = "type")]
        resource_type: String,
        #[serde(default)]
        config: IndexMap<String, String>,
    },
    /// An alias for a name in the enclosing scope
    Link { target: String },
}

impl ResourceBinding {
    pub fn is_link(&self) -> bool {
        matches!(self, ResourceBinding::Link { .. })
    }
}

/// A scope of bound names, in binding order.
#[derive(Debug)]
pub struct NamingResources {
    owner: String,
    entries: RwLock<IndexMap<String, ResourceBinding>>,
    parent: Option<Arc<NamingResources>>,
}

impl NamingResources {
    /// The process-wide scope.
    pub fn global() -> Self {
        Self::new("global", None)
    }

    /// A scope whose links resolve in `parent`.
    pub fn new(owner: impl Into<String>, parent: Option<Arc<NamingResources>>) -> Self {
        Self {
            owner: owner.into(),
            entries: RwLock::new(IndexMap::new()),
            parent,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The binding stored under `name`, without following links.
    pub fn get(&self, name: &str) -> Option<ResourceBinding> {
        self.entries.read().get(name).cloned()
    }

    /// Bind any kind of entry.
    pub fn bind(&self, name: impl Into<String>, binding: ResourceBinding) -> Result<(), NamingError> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(NamingError::DuplicateName {
                scope: self.owner.clone(),
                name,
            });
        }
        debug!(scope = %self.owner, name = %name, "Bound name");
        entries.insert(name, binding);
        Ok(())
    }

    pub fn add_environment(
        &self,
        name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), NamingError> {
        self.bind(
            name,
            ResourceBinding::Environment {
                value_type: value_type.into(),
                value: value.into(),
            },
        )
    }

    pub fn add_resource(
        &self,
        name: impl Into<String>,
        resource_type: impl Into<String>,
        config: IndexMap<String, String>,
    ) -> Result<(), NamingError> {
        self.bind(
            name,
            ResourceBinding::Resource {
                resource_type: resource_type.into(),
                config,
            },
        )
    }

    /// Bind a resource handle described by a type and its settings.
    pub fn add_binding(
        &self,
        name: impl Into<String>,
        type_descriptor: impl Into<String>,
        config: IndexMap<String, String>,
    ) -> Result<(), NamingError> {
        self.add_resource(name, type_descriptor, config)
    }

    /// Remove an environment or resource entry.
    pub fn remove_binding(&self, name: &str) -> Result<ResourceBinding, NamingError> {
        self.remove_matching(name, |b| !b.is_link())
    }

    pub fn add_link(&self, name: impl Into<String>, target: impl Into<String>) -> Result<(), NamingError> {
        self.bind(
            name,
            ResourceBinding::Link {
                target: target.into(),
            },
        )
    }

    pub fn remove_link(&self, name: &str) -> Result<ResourceBinding, NamingError> {
        self.remove_matching(name, ResourceBinding::is_link)
    }

    fn remove_matching(
        &self,
        name: &str,
        accept: impl Fn(&ResourceBinding) -> bool,
    ) -> Result<ResourceBinding, NamingError> {
        let mut entries = self.entries.write();
        match entries.get(name) {
            Some(binding) if accept(binding) => {}
            _ => {
                return Err(NamingError::NotFound {
                    scope: self.owner.clone(),
                    name: name.to_string(),
                });
            }
        }
        debug!(scope = %self.owner, name, "Unbound name");
        entries
            .shift_remove(name)
            .ok_or_else(|| NamingError::NotFound {
                scope: self.owner.clone(),
                name: name.to_string(),
            })
    }

    /// Resolve `name` to a concrete (non-link) binding.
    ///
    /// Links resolve in the parent scope, or in this scope when there is none.
    pub fn lookup(&self, name: &str) -> Result<ResourceBinding, NamingError> {
        let binding = self.get(name).ok_or_else(|| NamingError::NotFound {
            scope: self.owner.clone(),
            name: name.to_string(),
        })?;
        let mut visited = HashSet::from([format!("{}:{}", self.owner, name)]);
        let mut current = binding;
        let mut via = name.to_string();

        loop {
            let ResourceBinding::Link { target } = &current else {
                return Ok(current);
            };
            let scope: &NamingResources = self.parent.as_deref().unwrap_or(self);
            if !visited.insert(format!("{}:{}", scope.owner, target)) {
                return Err(NamingError::LinkCycle { name: via });
            }
            let next = scope.get(target).ok_or_else(|| NamingError::DanglingLink {
                name: via.clone(),
                target: target.clone(),
            })?;
            via = target.clone();
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let scope = NamingResources::global();
        scope.add_environment("greeting", "String", "hello").unwrap();
        assert!(matches!(
            scope.add_link("greeting", "other"),
            Err(NamingError::DuplicateName { .. })
        ));
    }

    #[test]
    fn links_resolve_in_parent_scope() {
        let global = Arc::new(NamingResources::global());
        global
            .add_resource("jdbc/main", "DataSource", IndexMap::from([("url".to_string(), "db://main".to_string())]))
            .unwrap();
        let unit = NamingResources::new("shop", Some(global));
        unit.add_link("db", "jdbc/main").unwrap();

        let ResourceBinding::Resource { resource_type, .. } = unit.lookup("db").unwrap() else {
            panic!("expected resource");
        };
        assert_eq!(resource_type, "DataSource");
    }

    #[test]
    fn cycles_and_dangling_links_are_errors() {
        let scope = NamingResources::global();
        scope.add_link("a", "b").unwrap();
        scope.add_link("b", "a").unwrap();
        scope.add_link("lost", "missing").unwrap();

        assert!(matches!(scope.lookup("a"), Err(NamingError::LinkCycle { .. })));
        assert_eq!(
            scope.lookup("lost"),
            Err(NamingError::DanglingLink {
                name: "lost".into(),
                target: "missing".into()
            })
        );
    }

    #[test]
    fn removal_is_kind_aware() {
        let scope = NamingResources::global();
        scope.add_link("db", "jdbc/main").unwrap();
        assert!(scope.remove_binding("db").is_err());
        assert!(scope.remove_link("db").unwrap().is_link());
        assert!(matches!(
            scope.remove_link("db"),
            Err(NamingError::NotFound { .. })
        ));
    }
}
