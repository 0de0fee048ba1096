//! Plugin entries compiled into the binary.

use harbor_core::plugin::{EntryCatalog, EntryError, InterestSet, PluginEntry, UnitContext};
use std::sync::Arc;
use tracing::info;

/// Entry name of [`InterestLogger`].
pub const INTEREST_LOGGER: &str = "harbor.InterestLogger";

/// Logs the types it was handed and records their count as the
/// `harbor.interest` attribute.
#[derive(Debug, Default)]
pub struct InterestLogger;

impl PluginEntry for InterestLogger {
    fn on_activate(&self, interest: &InterestSet, context: &UnitContext) -> Result<(), EntryError> {
        for type_name in interest.names() {
            info!(unit = %context.unit(), type_name = %type_name, "Interest");
        }
        context.set_attribute("harbor.interest", interest.len().to_string());
        Ok(())
    }

    fn on_deactivate(&self, context: &UnitContext) {
        info!(unit = %context.unit(), generation = context.generation(), "Interest logger released");
    }
}

/// Entries available to every unit started by the CLI.
pub fn catalog() -> EntryCatalog {
    EntryCatalog::new().with(INTEREST_LOGGER, Arc::new(InterestLogger))
}
