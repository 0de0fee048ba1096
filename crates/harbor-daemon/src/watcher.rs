//! Container listener that records structural changes.

use harbor_core::container::{ContainerEvent, ContainerListener, ContainerNode};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Path of the node that fired the event
    pub source: String,
    pub event: ContainerEvent,
}

/// Running totals per event kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JournalCounts {
    pub nodes_added: usize,
    pub nodes_removed: usize,
    pub aliases_added: usize,
    pub aliases_removed: usize,
}

/// Logs every event bubbling up to the engine and keeps a journal of them.
#[derive(Debug, Default)]
pub struct DeploymentWatcher {
    journal: Mutex<Vec<JournalEntry>>,
    counts: Mutex<JournalCounts>,
}

impl DeploymentWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal.lock().clone()
    }

    pub fn counts(&self) -> JournalCounts {
        *self.counts.lock()
    }

    pub fn len(&self) -> usize {
        self.journal.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.lock().is_empty()
    }
}

impl ContainerListener for DeploymentWatcher {
    fn container_event(&self, source: &ContainerNode, event: &ContainerEvent) {
        let source = source.path();
        {
            let mut counts = self.counts.lock();
            match event {
                ContainerEvent::NodeAdded { parent, child, kind } => {
                    counts.nodes_added += 1;
                    info!(source = %source, parent = %parent, child = %child, kind = %kind, "Deployed");
                }
                ContainerEvent::NodeRemoved { parent, child, kind } => {
                    counts.nodes_removed += 1;
                    info!(source = %source, parent = %parent, child = %child, kind = %kind, "Undeployed");
                }
                ContainerEvent::AliasAdded { host, alias } => {
                    counts.aliases_added += 1;
                    info!(host = %host, alias = %alias, "Alias added");
                }
                ContainerEvent::AliasRemoved { host, alias } => {
                    counts.aliases_removed += 1;
                    info!(host = %host, alias = %alias, "Alias removed");
                }
            }
        }
        self.journal.lock().push(JournalEntry {
            source,
            event: event.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::container::Engine;
    use std::sync::Arc;

    #[test]
    fn test_counts_bubbled_events() {
        let engine = Engine::new("harbor");
        let watcher = Arc::new(DeploymentWatcher::new());
        engine.add_listener(watcher.clone());

        engine.add_host("localhost").unwrap();
        engine.add_alias("localhost", "www").unwrap();
        engine.remove_host("localhost").unwrap();

        assert_eq!(
            watcher.counts(),
            JournalCounts {
                nodes_added: 1,
                nodes_removed: 1,
                aliases_added: 1,
                aliases_removed: 1,
            }
        );
        let journal = watcher.journal();
        assert_eq!(journal.len(), 4);
        assert_eq!(journal[1].source, "harbor/localhost");
        assert!(matches!(journal[3].event, ContainerEvent::NodeRemoved { .. }));
    }
}
