//! Harbor Daemon - long-running hosting runtime
//!
//! This crate turns a [`harbor_common::config::HarborConfig`] into a running server:
//! - Engine, hosts, aliases and units assembled from configuration
//! - Host auto-deployment of directories under each app base
//! - Bounded start/stop pools per host
//! - A deployment watcher journaling container tree changes

pub mod deployer;
pub mod error;
pub mod pool;
pub mod server;
pub mod watcher;

pub use deployer::HostDeployer;
pub use error::{DaemonError, Result};
pub use pool::WorkerPool;
pub use server::{Server, UnitOutcome, UnitSummary};
pub use watcher::{DeploymentWatcher, JournalCounts, JournalEntry};
