use super::{build_server, prepare, GlobalArgs};
use crate::output::render_tree;
use starbase::AppResult;

/// Load the configuration and print the container tree without starting anything.
pub fn run_check(args: &GlobalArgs) -> AppResult {
    let (config, _guard) = match prepare(args) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return Ok(Some(1));
        }
    };

    let server = build_server(config)?;
    print!("{}", render_tree(server.engine()));
    println!("Configuration OK: {} unit(s)", server.units().len());
    Ok(None)
}
