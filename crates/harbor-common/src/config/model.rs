use harbor_core::loader::DelegationOrder;
use harbor_core::naming::ResourceBinding;
use harbor_core::scan::ScanFilterConfig;
use harbor_core::unit::UnitDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Root configuration from harbor.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarborConfig {
    /// Engine settings
    #[serde(default)]
    pub engine: EngineSection,

    /// Process-wide sources and shared libraries
    #[serde(default)]
    pub platform: PlatformSection,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Process-wide naming resources
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceSpec>,

    /// Virtual hosts
    #[serde(default, rename = "host")]
    pub hosts: Vec<HostSection>,
}

impl HarborConfig {
    pub fn host(&self, name: &str) -> Option<&HostSection> {
        self.hosts.iter().find(|h| h.name.eq_ignore_ascii_case(name))
    }

    pub fn unit_count(&self) -> usize {
        self.hosts.iter().map(|h| h.units.len()).sum()
    }
}

/// [engine] section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Engine name, the root of the container tree
    #[serde(default = "default_engine_name")]
    pub name: String,
    /// Host that receives names matching no host or alias
    pub default_host: Option<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            name: default_engine_name(),
            default_host: None,
        }
    }
}

fn default_engine_name() -> String {
    "harbor".to_string()
}

/// [platform] section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSection {
    /// Bootstrap source roots, consulted first by every loader
    #[serde(default)]
    pub bootstrap: Vec<PathBuf>,
    /// Shared library directories; each child directory is one shared artifact
    #[serde(default)]
    pub shared: Vec<PathBuf>,
    /// Parent-scope source roots
    #[serde(default)]
    pub parent: Vec<PathBuf>,
    /// Default size of each host's start/stop pool
    #[serde(default = "default_threads")]
    pub start_stop_threads: usize,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            bootstrap: Vec::new(),
            shared: Vec::new(),
            parent: Vec::new(),
            start_stop_threads: default_threads(),
        }
    }
}

fn default_threads() -> usize {
    4
}

/// [logging] section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `HARBOR_LOG`
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log file; logs go to stderr when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}' (expected pretty or json)", other)),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// A `[[resource]]` entry: a name plus its binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    #[serde(flatten)]
    pub binding: ResourceBinding,
}

/// [[host]] section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSection {
    /// Host name, matched case-insensitively
    pub name: String,
    /// Directory holding this host's units
    #[serde(default = "default_app_base")]
    pub app_base: PathBuf,
    /// Alternate names
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Deploy every directory under `app_base` that is not configured explicitly
    #[serde(default = "default_true")]
    pub deploy_on_startup: bool,
    /// Directory names matching this regex are never auto-deployed
    pub deploy_ignore: Option<String>,
    /// Create `app_base` if it is missing
    #[serde(default = "default_true")]
    pub create_dirs: bool,
    /// Size of this host's start/stop pool; falls back to the platform value
    pub start_stop_threads: Option<usize>,
    /// Explicitly configured units
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitSection>,
}

fn default_app_base() -> PathBuf {
    PathBuf::from("apps")
}

fn default_true() -> bool {
    true
}

/// [[host.unit]] section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSection {
    pub name: String,
    /// Base directory; relative to the host's `app_base`, defaults to the unit name
    pub base: Option<PathBuf>,
    #[serde(default)]
    pub delegation: DelegationOrder,
    #[serde(default)]
    pub reserved_prefixes: Vec<String>,
    #[serde(default)]
    pub bootstrap_types: Vec<String>,
    #[serde(default)]
    pub scan: ScanFilterConfig,
    /// Unit-scoped naming resources
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceSpec>,
}

impl UnitSection {
    /// A unit with default settings, as produced by host auto-deployment.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            delegation: DelegationOrder::default(),
            reserved_prefixes: Vec::new(),
            bootstrap_types: Vec::new(),
            scan: ScanFilterConfig::default(),
            resources: Vec::new(),
        }
    }

    pub fn base_path(&self, app_base: &Path) -> PathBuf {
        match &self.base {
            Some(base) if base.is_absolute() => base.clone(),
            Some(base) => app_base.join(base),
            None => app_base.join(&self.name),
        }
    }

    pub fn descriptor(&self, app_base: &Path) -> UnitDescriptor {
        UnitDescriptor {
            name: self.name.clone(),
            base_path: self.base_path(app_base),
            delegation: self.delegation,
            reserved_prefixes: self.reserved_prefixes.clone(),
            bootstrap_types: self.bootstrap_types.clone(),
            scan: self.scan.clone(),
        }
    }
}
