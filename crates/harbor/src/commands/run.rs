use super::{build_server, prepare, GlobalArgs};
use crate::output::render_units;
use miette::IntoDiagnostic;
use owo_colors::OwoColorize;
use starbase::AppResult;
use tracing::{info, warn};

/// Start the server and keep it up until Ctrl-C.
pub async fn run_server(args: &GlobalArgs) -> AppResult {
    let (config, _guard) = match prepare(args) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(Some(1));
        }
    };

    let server = build_server(config)?;
    let outcomes = server.start().await;
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    print!("{}", render_units(&server.summaries(), true));
    if failed > 0 {
        warn!(failed, "Some units failed to start");
        println!("{} {} unit(s) failed to start", "!".red(), failed);
    }

    let shutdown = server.shutdown_token();
    println!("{} Press Ctrl-C to stop", "harbor".bold());
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.into_diagnostic()?;
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }

    server.stop().await;
    let counts = server.watcher().counts();
    info!(
        nodes_added = counts.nodes_added,
        aliases_added = counts.aliases_added,
        "Deployment journal"
    );
    Ok(None)
}
