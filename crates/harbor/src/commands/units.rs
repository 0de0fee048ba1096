use super::{build_server, prepare, GlobalArgs};
use crate::output::{render_units, render_units_json, OutputFormat};
use miette::IntoDiagnostic;
use starbase::AppResult;

/// Start every unit, print the unit table, then stop.
pub async fn run_units(args: &GlobalArgs, format: OutputFormat) -> AppResult {
    let (config, _guard) = match prepare(args) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(Some(1));
        }
    };

    let server = build_server(config)?;
    server.start().await;
    let summaries = server.summaries();
    match format {
        OutputFormat::Text => print!("{}", render_units(&summaries, true)),
        OutputFormat::Json => println!("{}", render_units_json(&summaries).into_diagnostic()?),
    }
    server.stop().await;
    Ok(None)
}
