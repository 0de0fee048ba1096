//! Text and JSON rendering for CLI output.

use clap::ValueEnum;
use harbor_core::container::Engine;
use harbor_core::unit::UnitState;
use harbor_daemon::UnitSummary;
use owo_colors::OwoColorize;
use std::fmt::Write;

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// The container tree, one node per line.
pub fn render_tree(engine: &Engine) -> String {
    let default_host = engine.default_host();
    let mut out = format!("{}\n", engine.name());
    for host in engine.hosts() {
        let mut line = format!("└─ {}", host.name());
        let aliases = engine.find_aliases(host.name());
        if !aliases.is_empty() {
            let _ = write!(line, " (aliases: {})", aliases.join(", "));
        }
        if default_host.as_deref() == Some(host.name()) {
            line.push_str(" [default]");
        }
        out.push_str(&line);
        out.push('\n');
        for unit in engine.units(host.name()) {
            let _ = writeln!(out, "   └─ {} → {}", unit.name(), unit.base_path().display());
        }
    }
    out
}

fn state_label(state: UnitState, color: bool) -> String {
    let label = state.to_string();
    if !color {
        return label;
    }
    match state {
        UnitState::Started => label.green().to_string(),
        UnitState::Failed => label.red().to_string(),
        UnitState::Starting | UnitState::Stopping => label.yellow().to_string(),
        UnitState::Stopped => label.dimmed().to_string(),
    }
}

/// Unit table with host, name, state, loader generation, active plugins and last error.
pub fn render_units(rows: &[UnitSummary], color: bool) -> String {
    let host_width = rows.iter().map(|r| r.host.len()).max().unwrap_or(0).max(4);
    let unit_width = rows.iter().map(|r| r.unit.len()).max().unwrap_or(0).max(4);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:host_width$}  {:unit_width$}  {:8}  {:>3}  PLUGINS",
        "HOST", "UNIT", "STATE", "GEN"
    );
    for row in rows {
        let generation = row
            .status
            .generation
            .map(|g| g.to_string())
            .unwrap_or_else(|| "-".to_string());
        let padding = " ".repeat(8usize.saturating_sub(row.status.state.to_string().len()));
        let state = format!("{}{}", state_label(row.status.state, color), padding);
        let plugins = if row.plugins.is_empty() {
            "-".to_string()
        } else {
            row.plugins.join(", ")
        };
        let _ = writeln!(
            out,
            "{:host_width$}  {:unit_width$}  {}  {:>3}  {}",
            row.host, row.unit, state, generation, plugins
        );
        if let Some(error) = &row.status.last_error {
            let _ = writeln!(out, "{:host_width$}  {:unit_width$}  error: {}", "", "", error);
        }
    }
    out
}

pub fn render_units_json(rows: &[UnitSummary]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(rows)
}
