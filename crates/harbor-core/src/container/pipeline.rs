//! Processing stages attached to container nodes.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Valve '{valve}' rejected {target}: {message}")]
pub struct ValveError {
    pub valve: String,
    pub target: String,
    pub message: String,
}

/// State carried through a pipeline.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    /// Path of the node the invocation is routed to
    pub target: String,
    /// Names of the valves that ran, in order
    pub trail: Vec<String>,
    pub attributes: IndexMap<String, String>,
}

impl Invocation {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }
}

/// One processing stage.
pub trait Valve: Send + Sync {
    fn name(&self) -> &str;

    fn invoke(&self, invocation: &mut Invocation) -> Result<(), ValveError>;
}

/// The valves owned by one node, in insertion order.
#[derive(Default)]
pub struct Pipeline {
    stages: RwLock<Vec<Arc<dyn Valve>>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_valve(&self, valve: Arc<dyn Valve>) {
        self.stages.write().push(valve);
    }

    /// Remove the first valve called `name`.
    pub fn remove_valve(&self, name: &str) -> Option<Arc<dyn Valve>> {
        let mut stages = self.stages.write();
        let index = stages.iter().position(|v| v.name() == name)?;
        Some(stages.remove(index))
    }

    pub fn stages(&self) -> Vec<Arc<dyn Valve>> {
        self.stages.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.stages.read().iter().map(|v| v.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.read().is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Run `stages` in order, stopping at the first rejection.
pub fn run(stages: &[Arc<dyn Valve>], invocation: &mut Invocation) -> Result<(), ValveError> {
    for valve in stages {
        valve.invoke(invocation)?;
        invocation.trail.push(valve.name().to_string());
    }
    Ok(())
}

/// Valve that stamps an attribute on every invocation.
#[derive(Debug, Clone)]
pub struct AttributeValve {
    name: String,
    key: String,
    value: String,
}

impl AttributeValve {
    pub fn new(name: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Valve for AttributeValve {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, invocation: &mut Invocation) -> Result<(), ValveError> {
        invocation
            .attributes
            .insert(self.key.clone(), self.value.clone());
        Ok(())
    }
}
