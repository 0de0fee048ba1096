use super::source::SourceTier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata optionally embedded in a definition as a JSON document.
///
/// Opaque (non-JSON) definitions get an empty manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeManifest {
    /// Direct supertypes, by name.
    #[serde(default)]
    pub extends: Vec<String>,
    /// Attribute tags carried by the type.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TypeManifest {
    pub fn parse(bytes: &[u8]) -> Self {
        serde_json::from_slice(bytes).unwrap_or_default()
    }
}

/// Where a definition came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub tier: SourceTier,
    pub provider: String,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier, self.provider)
    }
}

/// A resolved type. Handed out as `Arc<TypeDefinition>`; identity is pointer identity.
#[derive(Debug)]
pub struct TypeDefinition {
    name: String,
    bytes: Vec<u8>,
    origin: Origin,
    generation: u64,
    manifest: TypeManifest,
}

impl TypeDefinition {
    pub(crate) fn new(name: &str, bytes: Vec<u8>, origin: Origin, generation: u64) -> Self {
        let manifest = TypeManifest::parse(&bytes);
        Self {
            name: name.to_string(),
            bytes,
            origin,
            generation,
            manifest,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Generation of the loader that produced this definition.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn manifest(&self) -> &TypeManifest {
        &self.manifest
    }

    pub fn extends(&self) -> &[String] {
        &self.manifest.extends
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.manifest.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_is_optional() {
        assert_eq!(TypeManifest::parse(b"\x00\x01binary"), TypeManifest::default());

        let manifest = TypeManifest::parse(br#"{"extends": ["web.Handler"], "tags": ["Route"]}"#);
        assert_eq!(manifest.extends, vec!["web.Handler"]);
        assert_eq!(manifest.tags, vec!["Route"]);
    }
}
