//! Tracing subscriber setup.

use crate::config::{LogFormat, LoggingConfig};
use anyhow::Context;
pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding filter directives; wins over the configured level.
pub const LOG_ENV: &str = "HARBOR_LOG";

/// Build the filter from `HARBOR_LOG`, falling back to `level`.
pub fn env_filter(level: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level '{}'", level))
}

/// Install the global subscriber.
///
/// The returned guard flushes buffered output on drop; keep it alive for the
/// life of the process.
pub fn init(config: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    let filter = env_filter(&config.level)?;

    let (writer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("log file '{}' has no file name", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory '{}'", dir.display()))?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(config.file.is_none())
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}
