//! The container tree: Engine → Host → Unit.
//!
//! Nodes own their children and hold a weak back-reference to their parent.
//! Structural changes are reported as [`ContainerEvent`]s to the listeners of
//! the node where the change happened, then to each ancestor's listeners.

pub mod alias;
pub mod engine;
pub mod pipeline;

pub use alias::{AliasError, AliasTable};
pub use engine::Engine;
pub use pipeline::{AttributeValve, Invocation, Pipeline, Valve, ValveError};

use crate::unit::Unit;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("'{parent}' already has a child named '{name}'")]
    DuplicateName { parent: String, name: String },

    #[error("'{parent}' has no child named '{name}'")]
    NotFound { parent: String, name: String },

    #[error("A {child} cannot be placed under the {parent_kind} '{parent}'")]
    InvalidChild {
        parent: String,
        parent_kind: NodeKind,
        child: NodeKind,
    },

    #[error("'{name}' is already attached to '{parent}'")]
    AlreadyAttached { name: String, parent: String },

    #[error(transparent)]
    Alias(#[from] AliasError),
}

/// Level of a node in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Engine,
    Host,
    Unit,
}

impl NodeKind {
    pub fn depth(self) -> usize {
        match self {
            NodeKind::Engine => 0,
            NodeKind::Host => 1,
            NodeKind::Unit => 2,
        }
    }

    /// The only kind this kind may own.
    pub fn child_kind(self) -> Option<NodeKind> {
        match self {
            NodeKind::Engine => Some(NodeKind::Host),
            NodeKind::Host => Some(NodeKind::Unit),
            NodeKind::Unit => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Engine => "engine",
            NodeKind::Host => "host",
            NodeKind::Unit => "unit",
        };
        f.write_str(label)
    }
}

/// Structural change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    NodeAdded {
        parent: String,
        child: String,
        kind: NodeKind,
    },
    NodeRemoved {
        parent: String,
        child: String,
        kind: NodeKind,
    },
    AliasAdded {
        host: String,
        alias: String,
    },
    AliasRemoved {
        host: String,
        alias: String,
    },
}

/// Receives events from a node and its descendants.
pub trait ContainerListener: Send + Sync {
    /// `source` is the node the change happened on.
    fn container_event(&self, source: &ContainerNode, event: &ContainerEvent);
}

/// A named node of the container tree.
pub struct ContainerNode {
    name: String,
    kind: NodeKind,
    parent: RwLock<Weak<ContainerNode>>,
    children: RwLock<IndexMap<String, Arc<ContainerNode>>>,
    listeners: RwLock<Vec<Arc<dyn ContainerListener>>>,
    pipeline: Pipeline,
    unit: Option<Arc<Unit>>,
}

impl ContainerNode {
    fn new(name: impl Into<String>, kind: NodeKind, unit: Option<Arc<Unit>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(IndexMap::new()),
            listeners: RwLock::new(Vec::new()),
            pipeline: Pipeline::new(),
            unit,
        })
    }

    pub fn engine(name: impl Into<String>) -> Arc<Self> {
        Self::new(name, NodeKind::Engine, None)
    }

    /// Host names are case-insensitive and stored lowercased.
    pub fn host(name: &str) -> Arc<Self> {
        Self::new(alias::normalize(name), NodeKind::Host, None)
    }

    pub fn unit(unit: Arc<Unit>) -> Arc<Self> {
        let name = unit.name().to_string();
        Self::new(name, NodeKind::Unit, Some(unit))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The unit behind a [`NodeKind::Unit`] node.
    pub fn as_unit(&self) -> Option<&Arc<Unit>> {
        self.unit.as_ref()
    }

    pub fn parent(&self) -> Option<Arc<ContainerNode>> {
        self.parent.read().upgrade()
    }

    /// Names from the root down to this node, joined with `/`.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}/{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    pub fn add_child(self: &Arc<Self>, child: Arc<ContainerNode>) -> Result<(), ContainerError> {
        if self.kind.child_kind() != Some(child.kind) {
            return Err(ContainerError::InvalidChild {
                parent: self.name.clone(),
                parent_kind: self.kind,
                child: child.kind,
            });
        }
        {
            let mut child_parent = child.parent.write();
            if let Some(existing) = child_parent.upgrade() {
                return Err(ContainerError::AlreadyAttached {
                    name: child.name.clone(),
                    parent: existing.name.clone(),
                });
            }
            let mut children = self.children.write();
            if children.contains_key(&child.name) {
                return Err(ContainerError::DuplicateName {
                    parent: self.name.clone(),
                    name: child.name.clone(),
                });
            }
            children.insert(child.name.clone(), Arc::clone(&child));
            *child_parent = Arc::downgrade(self);
        }
        debug!(parent = %self.path(), child = %child.name, kind = %child.kind, "Added child");
        self.fire(&ContainerEvent::NodeAdded {
            parent: self.name.clone(),
            child: child.name.clone(),
            kind: child.kind,
        });
        Ok(())
    }

    /// Detach and return the child called `name`.
    pub fn remove_child(&self, name: &str) -> Result<Arc<ContainerNode>, ContainerError> {
        let removed = self
            .children
            .write()
            .shift_remove(name)
            .ok_or_else(|| ContainerError::NotFound {
                parent: self.name.clone(),
                name: name.to_string(),
            })?;
        *removed.parent.write() = Weak::new();
        debug!(parent = %self.path(), child = %removed.name, "Removed child");
        self.fire(&ContainerEvent::NodeRemoved {
            parent: self.name.clone(),
            child: removed.name.clone(),
            kind: removed.kind,
        });
        Ok(removed)
    }

    pub fn find_child(&self, name: &str) -> Option<Arc<ContainerNode>> {
        self.children.read().get(name).cloned()
    }

    /// Children in insertion order.
    pub fn children(&self) -> Vec<Arc<ContainerNode>> {
        self.children.read().values().cloned().collect()
    }

    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ContainerListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Deliver `event` to this node's listeners, then to each ancestor's.
    pub fn fire(&self, event: &ContainerEvent) {
        let mut node: Option<Arc<ContainerNode>> = None;
        loop {
            let current: &ContainerNode = node.as_deref().unwrap_or(self);
            let listeners = current.listeners.read().clone();
            for listener in &listeners {
                listener.container_event(self, event);
            }
            match current.parent() {
                Some(parent) => node = Some(parent),
                None => break,
            }
        }
    }

    /// This node's own valves.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Valves applied to work routed through this node: its own first, then each ancestor's.
    pub fn effective_pipeline(&self) -> Vec<Arc<dyn Valve>> {
        let mut stages = self.pipeline.stages();
        let mut next = self.parent();
        while let Some(ancestor) = next {
            stages.extend(ancestor.pipeline.stages());
            next = ancestor.parent();
        }
        stages
    }

    /// Run an invocation through the effective pipeline.
    pub fn invoke(&self, invocation: &mut Invocation) -> Result<(), ValveError> {
        pipeline::run(&self.effective_pipeline(), invocation)
    }
}

impl fmt::Debug for ContainerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerNode")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("children", &self.children.read().keys().collect::<Vec<_>>())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<(String, ContainerEvent)>>,
    }

    impl ContainerListener for Journal {
        fn container_event(&self, source: &ContainerNode, event: &ContainerEvent) {
            self.events.lock().push((source.name().to_string(), event.clone()));
        }
    }

    #[test]
    fn sibling_names_are_unique() {
        let engine = ContainerNode::engine("harbor");
        engine.add_child(ContainerNode::host("localhost")).unwrap();
        let err = engine.add_child(ContainerNode::host("LOCALHOST")).unwrap_err();
        assert!(matches!(err, ContainerError::DuplicateName { .. }));
    }

    #[test]
    fn kinds_follow_fixed_depth() {
        let engine = ContainerNode::engine("harbor");
        let err = engine.add_child(ContainerNode::engine("nested")).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidChild { .. }));
    }

    #[test]
    fn a_child_has_one_parent() {
        let one = ContainerNode::engine("one");
        let two = ContainerNode::engine("two");
        let host = ContainerNode::host("localhost");
        one.add_child(host.clone()).unwrap();
        assert!(matches!(
            two.add_child(host.clone()),
            Err(ContainerError::AlreadyAttached { .. })
        ));

        one.remove_child("localhost").unwrap();
        assert!(host.parent().is_none());
        two.add_child(host).unwrap();
    }

    #[test]
    fn events_bubble_to_ancestors_in_order() {
        let engine = ContainerNode::engine("harbor");
        let host = ContainerNode::host("localhost");
        engine.add_child(host.clone()).unwrap();

        let journal = Arc::new(Journal::default());
        engine.add_listener(journal.clone());
        host.fire(&ContainerEvent::AliasAdded {
            host: "localhost".into(),
            alias: "www".into(),
        });
        engine.remove_child("localhost").unwrap();

        let events = journal.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "localhost");
        assert!(matches!(events[1].1, ContainerEvent::NodeRemoved { .. }));
    }

    #[test]
    fn pipeline_runs_innermost_first() {
        let engine = ContainerNode::engine("harbor");
        let host = ContainerNode::host("localhost");
        engine.add_child(host.clone()).unwrap();
        engine
            .pipeline()
            .add_valve(Arc::new(AttributeValve::new("engine-stamp", "tier", "engine")));
        host.pipeline()
            .add_valve(Arc::new(AttributeValve::new("host-stamp", "tier", "host")));

        let mut invocation = Invocation::new(host.path());
        host.invoke(&mut invocation).unwrap();
        assert_eq!(invocation.target, "harbor/localhost");
        assert_eq!(invocation.trail, vec!["host-stamp", "engine-stamp"]);
        assert_eq!(invocation.attributes["tier"], "engine");
    }
}
