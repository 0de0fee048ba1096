//! Subcommand implementations.

pub mod check;
pub mod run;
pub mod units;

pub use check::run_check;
pub use run::run_server;
pub use units::run_units;

use anyhow::Context;
use harbor_common::config::{HarborConfig, LogFormat};
use harbor_common::logging::{self, WorkerGuard};
use harbor_daemon::Server;
use miette::IntoDiagnostic;
use std::path::PathBuf;
use tracing::{debug, info};

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
    pub verbose: bool,
}

/// Load the configuration, applying command-line overrides.
///
/// Without a config file the server runs with defaults rooted at the working directory.
pub fn load_config(args: &GlobalArgs) -> anyhow::Result<HarborConfig> {
    let mut config = match HarborConfig::locate(args.config.as_deref()) {
        Some(path) => HarborConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let mut config = HarborConfig::default();
            config.resolve_paths(&std::env::current_dir()?);
            config
        }
    };
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    Ok(config)
}

/// Load configuration and install logging. The guard must outlive the command.
pub fn prepare(args: &GlobalArgs) -> anyhow::Result<(HarborConfig, WorkerGuard)> {
    let config = load_config(args)?;
    let guard = logging::init(&config.logging)?;
    debug!(hosts = config.hosts.len(), units = config.unit_count(), "Configuration loaded");
    Ok((config, guard))
}

/// Assemble the server with the built-in plugin entries.
pub fn build_server(config: HarborConfig) -> miette::Result<Server> {
    let server = Server::from_config(config, crate::builtin::catalog()).into_diagnostic()?;
    info!(engine = %server.engine().name(), units = server.units().len(), "Server ready");
    Ok(server)
}
