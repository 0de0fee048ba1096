//! Alternate host names.

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AliasError {
    #[error("Alias '{alias}' already maps to host '{existing}'")]
    Conflict { alias: String, existing: String },

    #[error("No host is known as '{alias}'")]
    NotFound { alias: String },
}

/// Alias → host name. Names are matched case-insensitively.
#[derive(Debug, Default)]
pub struct AliasTable {
    entries: RwLock<IndexMap<String, String>>,
}

pub(crate) fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `alias` to `host`. Returns `false` when that exact mapping already existed.
    pub fn add(&self, host: &str, alias: &str) -> Result<bool, AliasError> {
        let alias = normalize(alias);
        let host = normalize(host);
        let mut entries = self.entries.write();
        match entries.get(&alias) {
            Some(existing) if *existing == host => Ok(false),
            Some(existing) => Err(AliasError::Conflict {
                alias,
                existing: existing.clone(),
            }),
            None => {
                entries.insert(alias, host);
                Ok(true)
            }
        }
    }

    /// Remove `alias` if it maps to `host`. Absent aliases are ignored.
    pub fn remove(&self, host: &str, alias: &str) -> bool {
        let alias = normalize(alias);
        let host = normalize(host);
        let mut entries = self.entries.write();
        if entries.get(&alias) == Some(&host) {
            entries.shift_remove(&alias);
            true
        } else {
            false
        }
    }

    pub fn resolve(&self, alias: &str) -> Result<String, AliasError> {
        let alias = normalize(alias);
        self.entries
            .read()
            .get(&alias)
            .cloned()
            .ok_or(AliasError::NotFound { alias })
    }

    pub fn aliases_of(&self, host: &str) -> Vec<String> {
        let host = normalize(host);
        self.entries
            .read()
            .iter()
            .filter(|(_, h)| **h == host)
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Drop every alias of `host`, returning them.
    pub fn remove_host(&self, host: &str) -> Vec<String> {
        let host = normalize(host);
        let mut entries = self.entries.write();
        let removed: Vec<String> = entries
            .iter()
            .filter(|(_, h)| **h == host)
            .map(|(a, _)| a.clone())
            .collect();
        entries.retain(|_, h| *h != host);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
