//! Reading plugin declarations out of scanned artifacts.

use super::{PluginDescriptor, PluginRegistry, TypeMatcher};
use crate::scan::{ArtifactHandle, ScanCallback, ScanKind, VisitError};
use serde::{Deserialize, Serialize};

/// Declaration file looked up at the root of each artifact.
pub const PLUGIN_MANIFEST: &str = "plugins.toml";

/// Contents of a `plugins.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub plugin: Vec<PluginDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDeclaration {
    pub entry: String,
    #[serde(default)]
    pub interest: Vec<TypeMatcher>,
}

impl PluginManifest {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Scan callback feeding a [`PluginRegistry`].
///
/// Artifacts without a manifest are ignored; an unreadable or malformed
/// manifest is reported as a failed visit.
#[derive(Debug, Default)]
pub struct PluginDiscovery {
    registry: PluginRegistry,
}

impl PluginDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> PluginRegistry {
        self.registry
    }
}

impl ScanCallback for PluginDiscovery {
    fn visit(&mut self, artifact: &ArtifactHandle<'_>, kind: ScanKind) -> Result<(), VisitError> {
        if kind != ScanKind::Plugin || !artifact.is_dir() || !artifact.contains(PLUGIN_MANIFEST) {
            return Ok(());
        }
        let content = artifact.read_to_string(PLUGIN_MANIFEST)?;
        let manifest = PluginManifest::parse(&content)?;
        for declaration in manifest.plugin {
            self.registry.register(PluginDescriptor {
                entry: declaration.entry,
                interest: declaration.interest,
                artifact: Some(artifact.path().to_path_buf()),
                scope: artifact.scope(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{ArtifactScanner, ScanContext, ScanError, ScanScope};
    use crate::vfs::MemoryVfs;
    use std::path::Path;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const LOCAL: &str = r#"
[[plugin]]
entry = "acme.Initializer"
interest = [{ subtype-of = "web.Handler" }, { tagged = "Route" }]

[[plugin]]
entry = "acme.Quiet"
"#;

    const SHARED: &str = r#"
[[plugin]]
entry = "acme.Initializer"
interest = [{ exact = "acme.Special" }]
"#;

    #[test]
    fn parses_matchers() {
        let manifest = PluginManifest::parse(LOCAL).unwrap();
        assert_eq!(
            manifest.plugin[0].interest,
            vec![
                TypeMatcher::SubtypeOf("web.Handler".into()),
                TypeMatcher::Tagged("Route".into())
            ]
        );
        assert!(manifest.plugin[1].interest.is_empty());
    }

    #[test]
    fn local_declarations_win_over_shared() {
        let vfs = MemoryVfs::new()
            .with_file("/apps/shop/lib/acme/plugins.toml", LOCAL)
            .with_file("/platform/lib/acme-shared/plugins.toml", SHARED);
        let context = ScanContext::for_base("shop", Path::new("/apps/shop"), Arc::new(vfs))
            .with_shared_dirs(vec!["/platform/lib".into()]);
        let mut discovery = PluginDiscovery::new();
        ArtifactScanner::default()
            .scan(ScanKind::Plugin, &context, &mut discovery, &CancellationToken::new())
            .unwrap();

        let registry = discovery.into_registry();
        assert_eq!(registry.entry_names(), vec!["acme.Initializer", "acme.Quiet"]);
        let first = registry.descriptors().next().unwrap();
        assert_eq!(first.scope, ScanScope::UnitLocal);
        assert_eq!(first.interest.len(), 2);
    }

    #[test]
    fn malformed_manifest_fails_the_visit_only() {
        let vfs = MemoryVfs::new()
            .with_file("/apps/shop/lib/bad/plugins.toml", "[[plugin]\nentry=")
            .with_file("/apps/shop/lib/good/plugins.toml", LOCAL);
        let context = ScanContext::for_base("shop", Path::new("/apps/shop"), Arc::new(vfs));
        let mut discovery = PluginDiscovery::new();
        let err = ArtifactScanner::default()
            .scan(ScanKind::Plugin, &context, &mut discovery, &CancellationToken::new())
            .unwrap_err();

        assert!(matches!(err, ScanError::Composite(ref f) if f.failures.len() == 1));
        assert_eq!(discovery.registry().len(), 2);
    }
}
