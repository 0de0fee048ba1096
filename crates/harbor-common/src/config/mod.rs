//! Configuration module
//!
//! Handles loading and validating harbor configuration files (harbor.toml, harbor.json).

pub mod model;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use self::model::*;

/// File name looked up in the working directory and the user config directory.
pub const CONFIG_FILE: &str = "harbor.toml";

/// Problems found after a configuration parsed successfully
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Host '{0}' is configured more than once")]
    DuplicateHost(String),

    #[error("Unit '{unit}' is configured more than once on host '{host}'")]
    DuplicateUnit { host: String, unit: String },

    #[error("Default host '{0}' is not configured")]
    UnknownDefaultHost(String),

    #[error("Host '{host}' needs at least one start/stop thread")]
    NoThreads { host: String },
}

impl HarborConfig {
    /// Load configuration from a file path
    ///
    /// Relative paths inside the file are resolved against the file's directory.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let mut config: HarborConfig = match path.extension() {
            Some(ext) if ext == "json" => serde_json::from_str(&content)?,
            _ => toml::from_str(&content)?,
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    /// Pick the configuration file to use: an explicit path, `./harbor.toml`,
    /// then `<config dir>/harbor/harbor.toml`.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        Self::default_path().filter(|p| p.is_file())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("harbor").join(CONFIG_FILE))
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.platform.bootstrap.iter_mut().for_each(resolve);
        self.platform.shared.iter_mut().for_each(resolve);
        self.platform.parent.iter_mut().for_each(resolve);
        if let Some(file) = self.logging.file.as_mut() {
            resolve(file);
        }
        for host in &mut self.hosts {
            resolve(&mut host.app_base);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut hosts = HashSet::new();
        for host in &self.hosts {
            if !hosts.insert(host.name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateHost(host.name.clone()));
            }
            if host.start_stop_threads == Some(0) {
                return Err(ConfigError::NoThreads {
                    host: host.name.clone(),
                });
            }
            let mut units = HashSet::new();
            for unit in &host.units {
                if !units.insert(unit.name.as_str()) {
                    return Err(ConfigError::DuplicateUnit {
                        host: host.name.clone(),
                        unit: unit.name.clone(),
                    });
                }
            }
        }
        if let Some(default) = &self.engine.default_host {
            if !hosts.contains(&default.to_ascii_lowercase()) {
                return Err(ConfigError::UnknownDefaultHost(default.clone()));
            }
        }
        Ok(())
    }
}

impl HostSection {
    /// Threads for this host's pool.
    pub fn threads(&self, platform: &PlatformSection) -> usize {
        self.start_stop_threads
            .unwrap_or(platform.start_stop_threads)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::loader::DelegationOrder;
    use harbor_core::naming::ResourceBinding;

    const HARBOR_TOML: &str = r#"
[engine]
name = "harbor"
default_host = "localhost"

[platform]
shared = ["platform/lib"]
start_stop_threads = 2

[logging]
level = "debug"
format = "json"

[[resource]]
name = "jdbc/main"
kind = "resource"
type = "DataSource"
[resource.config]
url = "db://main"

[[host]]
name = "localhost"
app_base = "apps"
aliases = ["www.example.com"]
deploy_ignore = "^\\."

[[host.unit]]
name = "shop"
delegation = "shared-first"
reserved_prefixes = ["harbor."]
[host.unit.scan.pluggability]
skip = ["*-test*"]
[[host.unit.resource]]
name = "greeting"
kind = "environment"
type = "String"
value = "hello"
"#;

    #[test]
    fn test_load_toml() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file_path = dir.path().join("harbor.toml");
        std::fs::write(&file_path, HARBOR_TOML)?;

        let config = HarborConfig::load(&file_path)?;
        assert_eq!(config.engine.default_host.as_deref(), Some("localhost"));
        assert_eq!(config.platform.shared, vec![dir.path().join("platform/lib")]);
        assert_eq!(config.logging.format, LogFormat::Json);

        let host = config.host("LOCALHOST").unwrap();
        assert_eq!(host.app_base, dir.path().join("apps"));
        assert!(host.deploy_on_startup);
        assert_eq!(host.threads(&config.platform), 2);

        let unit = &host.units[0];
        assert_eq!(unit.delegation, DelegationOrder::SharedFirst);
        assert_eq!(unit.base_path(&host.app_base), dir.path().join("apps/shop"));
        assert_eq!(unit.scan.pluggability.skip, vec!["*-test*"]);
        assert!(unit.scan.scan_shared);
        assert_eq!(
            unit.resources[0].binding,
            ResourceBinding::Environment {
                value_type: "String".into(),
                value: "hello".into()
            }
        );
        assert!(matches!(
            config.resources[0].binding,
            ResourceBinding::Resource { ref config, .. } if config["url"] == "db://main"
        ));
        Ok(())
    }

    #[test]
    fn test_load_json() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file_path = dir.path().join("harbor.json");
        std::fs::write(
            &file_path,
            r#"{"host": [{"name": "localhost", "unit": [{"name": "shop", "base": "/srv/shop"}]}]}"#,
        )?;

        let config = HarborConfig::load(&file_path)?;
        let host = &config.hosts[0];
        assert_eq!(host.units[0].base_path(&host.app_base), PathBuf::from("/srv/shop"));
        assert_eq!(config.unit_count(), 1);
        Ok(())
    }

    #[test]
    fn test_duplicate_units_are_rejected() {
        let mut config = HarborConfig::default();
        config.hosts.push(HostSection {
            name: "localhost".into(),
            app_base: PathBuf::from("apps"),
            aliases: Vec::new(),
            deploy_on_startup: false,
            deploy_ignore: None,
            create_dirs: false,
            start_stop_threads: None,
            units: vec![UnitSection::named("shop"), UnitSection::named("shop")],
        });
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateUnit {
                host: "localhost".into(),
                unit: "shop".into()
            })
        );
    }

    #[test]
    fn test_unknown_default_host() {
        let config = HarborConfig {
            engine: EngineSection {
                name: "harbor".into(),
                default_host: Some("nowhere".into()),
            },
            ..HarborConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::UnknownDefaultHost(_))));
    }
}
