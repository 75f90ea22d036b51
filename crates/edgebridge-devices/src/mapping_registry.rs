//! Mapping Registry: capability name → capability mapping.
//!
//! Built once at startup (builtin table plus any mapping file) and shared
//! read-only afterwards. A capability with no entry is not an error; most
//! Bus facades simply have no Edge representation.

use crate::builtin_mappings::builtin_capability_mappings;
use crate::protocol::CapabilityMapping;
use edgebridge_core::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Immutable lookup table of capability mappings.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    mappings: HashMap<String, Arc<CapabilityMapping>>,
}

impl MappingRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard capability table.
    pub fn builtin() -> Self {
        Self::from_mappings(builtin_capability_mappings())
    }

    pub fn from_mappings(mappings: impl IntoIterator<Item = CapabilityMapping>) -> Self {
        let mut registry = Self::new();
        for mapping in mappings {
            registry.insert(mapping);
        }
        registry
    }

    /// Add or replace a mapping.
    pub fn insert(&mut self, mapping: CapabilityMapping) -> Option<Arc<CapabilityMapping>> {
        let previous = self
            .mappings
            .insert(mapping.capability.clone(), Arc::new(mapping));
        if let Some(prev) = &previous {
            tracing::info!(capability = %prev.capability, "Capability mapping replaced");
        }
        previous
    }

    /// Merge mappings from a JSON file holding an array of capability
    /// mappings. Returns how many were loaded.
    pub fn extend_from_json_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mappings: Vec<CapabilityMapping> = serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("mapping rules {}: {}", path.display(), e))
        })?;
        let count = mappings.len();
        for mapping in mappings {
            self.insert(mapping);
        }
        tracing::info!(
            category = "config",
            path = %path.display(),
            count,
            "Loaded capability mapping rules"
        );
        Ok(count)
    }

    pub fn lookup(&self, capability: &str) -> Option<Arc<CapabilityMapping>> {
        self.mappings.get(capability).cloned()
    }

    /// Capability names, sorted.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.mappings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_lookup() {
        let registry = MappingRegistry::builtin();
        assert!(registry.lookup("Facades/Switchable").is_some());
        assert!(registry.lookup("Facades/Unknown").is_none());
        assert!(registry.capabilities().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_mapping_file_overrides_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{
                "capability": "Facades/Switchable",
                "state": "power",
                "entries": [{{"path": "/3312/0/5850", "operations": ["GET"]}}]
            }}]"#
        )
        .unwrap();

        let mut registry = MappingRegistry::builtin();
        let before = registry.len();
        assert_eq!(registry.extend_from_json_file(file.path()).unwrap(), 1);
        assert_eq!(registry.len(), before);
        let switchable = registry.lookup("Facades/Switchable").unwrap();
        assert_eq!(switchable.entries[0].path, "/3312/0/5850");
    }

    #[test]
    fn test_malformed_mapping_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"capability\": 1}}").unwrap();
        let err = MappingRegistry::new()
            .extend_from_json_file(file.path())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
