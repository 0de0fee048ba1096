//! Harbor core - isolated units inside one long-running process
//!
//! This crate provides:
//! - The container tree (engine, hosts, units) with aliases and pipelines
//! - Per-unit module loaders with configurable delegation order and reload
//! - Artifact scanning with inclusion/exclusion filters
//! - Plugin discovery, interest matching and activation
//! - Naming resources bound per unit and process-wide
//! - A virtual file system so all of the above runs in memory as well as on disk

pub mod container;
pub mod error;
pub mod loader;
pub mod naming;
pub mod platform;
pub mod plugin;
pub mod scan;
pub mod unit;
pub mod vfs;

pub use container::{ContainerEvent, ContainerListener, ContainerNode, Engine, NodeKind};
pub use error::{HarborError, Result};
pub use loader::{DelegationOrder, LoaderConfig, ModuleLoader, TypeDefinition};
pub use naming::{NamingResources, ResourceBinding};
pub use platform::Platform;
pub use plugin::{EntryCatalog, InterestSet, PluginEntry, TypeMatcher, UnitContext};
pub use scan::{ArtifactScanner, ScanKind, ScanScope};
pub use unit::{Unit, UnitDescriptor, UnitState, UnitStatus};
