//! Works out which units a host deploys.

use crate::error::Result;
use harbor_common::config::{HostSection, UnitSection};
use harbor_core::vfs::Vfs;
use regex::Regex;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

/// Resolves a host's configured units plus the directories found under its app base.
#[derive(Debug)]
pub struct HostDeployer<'a> {
    host: &'a HostSection,
    ignore: Option<Regex>,
}

impl<'a> HostDeployer<'a> {
    pub fn new(host: &'a HostSection) -> Result<Self> {
        let ignore = host.deploy_ignore.as_deref().map(Regex::new).transpose()?;
        Ok(Self { host, ignore })
    }

    /// Whether auto-deployment skips the directory `name`.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Configured units first, in file order, then discovered directories by name.
    ///
    /// A directory is not discovered when a configured unit already has that
    /// name or uses it as its base.
    pub fn units(&self, vfs: &dyn Vfs) -> Result<Vec<UnitSection>> {
        let app_base = &self.host.app_base;
        if self.host.create_dirs && !vfs.is_dir(app_base) {
            info!(host = %self.host.name, app_base = %app_base.display(), "Creating app base");
            vfs.create_dir_all(app_base)?;
        }

        let mut units = self.host.units.clone();
        if !self.host.deploy_on_startup || !vfs.is_dir(app_base) {
            return Ok(units);
        }

        let claimed_names: HashSet<String> = units.iter().map(|u| u.name.clone()).collect();
        let claimed_bases: HashSet<PathBuf> = units.iter().map(|u| u.base_path(app_base)).collect();

        for dir in vfs.list_dir(app_base)? {
            if !vfs.is_dir(&dir) {
                continue;
            }
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if self.is_ignored(name) {
                debug!(host = %self.host.name, unit = %name, "Ignored by deploy filter");
                continue;
            }
            if claimed_names.contains(name) || claimed_bases.contains(&dir) {
                continue;
            }
            debug!(host = %self.host.name, unit = %name, "Discovered unit");
            units.push(UnitSection::named(name));
        }
        Ok(units)
    }
}
