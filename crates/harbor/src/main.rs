use clap::{Parser, Subcommand};
use harbor::commands::{run_check, run_server, run_units, GlobalArgs};
use harbor::OutputFormat;
use harbor_common::config::LogFormat;
use starbase::{App, AppResult, AppSession};
use std::path::PathBuf;

/// Harbor - a hosting container for isolated, hot-reloadable units
#[derive(Parser)]
#[command(name = "harbor")]
#[command(about = "Run and inspect a harbor server", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to harbor.toml (defaults to ./harbor.toml, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Subcommand)]
enum Commands {
    /// Start every unit and serve until Ctrl-C
    Run,
    /// Validate the configuration and print the container tree
    Check,
    /// Start every unit, print their status, then stop
    Units {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Clone)]
struct HarborSession {
    args: GlobalArgs,
    command: Commands,
}

#[async_trait::async_trait]
impl AppSession for HarborSession {
    async fn execute(&mut self) -> AppResult {
        match &self.command {
            Commands::Run => run_server(&self.args).await,
            Commands::Check => run_check(&self.args),
            Commands::Units { output } => run_units(&self.args, *output).await,
        }
    }
}

#[tokio::main]
async fn main() -> starbase::MainResult {
    let cli = Cli::parse();

    let session = HarborSession {
        args: GlobalArgs {
            config: cli.config,
            log_format: cli.log_format,
            verbose: cli.verbose,
        },
        command: cli.command,
    };

    let exit_code = App::default()
        .run(
            session,
            |mut session| async move { session.execute().await },
        )
        .await?;

    Ok(std::process::ExitCode::from(exit_code))
}
