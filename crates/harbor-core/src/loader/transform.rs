//! Byte-rewriting hooks applied to definitions before they are cached.

use std::fmt;

/// Instrumentation hook. Runs on every definition a loader produces, in registration order.
pub trait ByteTransformer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Return the bytes to define for `type_name`.
    fn transform(&self, type_name: &str, bytes: Vec<u8>) -> Vec<u8>;
}

/// Rewrites a JSON manifest to carry an extra tag. Non-JSON bytes pass through untouched.
#[derive(Debug, Clone)]
pub struct TagInjector {
    tag: String,
}

impl TagInjector {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl ByteTransformer for TagInjector {
    fn name(&self) -> &str {
        "tag-injector"
    }

    fn transform(&self, _type_name: &str, bytes: Vec<u8>) -> Vec<u8> {
        let Ok(mut doc) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            return bytes;
        };
        let Some(object) = doc.as_object_mut() else {
            return bytes;
        };
        let tags = object
            .entry("tags")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let Some(list) = tags.as_array_mut() {
            if !list.iter().any(|t| t.as_str() == Some(self.tag.as_str())) {
                list.push(serde_json::Value::String(self.tag.clone()));
            }
        }
        serde_json::to_vec(&doc).unwrap_or(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::TypeManifest;

    #[test]
    fn injects_tag_once() {
        let injector = TagInjector::new("Traced");
        let once = injector.transform("a.B", br#"{"tags": ["Route"]}"#.to_vec());
        let twice = injector.transform("a.B", once.clone());
        assert_eq!(once, twice);
        assert_eq!(TypeManifest::parse(&once).tags, vec!["Route", "Traced"]);
    }

    #[test]
    fn leaves_opaque_bytes_alone() {
        let injector = TagInjector::new("Traced");
        assert_eq!(injector.transform("a.B", b"raw".to_vec()), b"raw".to_vec());
    }
}
