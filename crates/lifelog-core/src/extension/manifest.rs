//! Extension manifest files.
//!
//! Each extension directory declares itself with an `extension.json`
//! manifest instead of relying on reflection or class-name conventions. The
//! `entry` field names a factory registered with the manager.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{ExtensionError, ExtensionMetadata, Result};

/// Manifest file name looked for during discovery.
pub const MANIFEST_FILE: &str = "extension.json";

/// Parsed `extension.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Unique extension name. Must match the directory name.
    pub name: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Description used verbatim in AI routing prompts.
    #[serde(default)]
    pub description: String,
    /// Semantic version string.
    pub version: String,
    /// Factory key the manager resolves this extension through.
    pub entry: String,
    /// Free-form extension configuration.
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl ExtensionManifest {
    /// Read and parse a manifest from an extension directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            ExtensionError::Manifest(format!("cannot read {}: {}", path.display(), e))
        })?;
        let manifest: Self = serde_json::from_str(&raw)
            .map_err(|e| ExtensionError::Manifest(format!("invalid {}: {}", path.display(), e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check required fields and version syntax.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ExtensionError::Manifest("missing name".into()));
        }
        if self.entry.is_empty() {
            return Err(ExtensionError::Manifest("missing entry".into()));
        }
        self.parsed_version()?;
        Ok(())
    }

    /// Parse the declared version.
    pub fn parsed_version(&self) -> Result<semver::Version> {
        self.version.parse().map_err(|e| {
            ExtensionError::Manifest(format!("invalid version '{}': {}", self.version, e))
        })
    }

    /// Identity metadata for instances built from this manifest.
    pub fn metadata(&self) -> Result<ExtensionMetadata> {
        let display_name = if self.display_name.is_empty() {
            self.name.clone()
        } else {
            self.display_name.clone()
        };
        Ok(ExtensionMetadata::new(
            self.name.clone(),
            display_name,
            self.description.clone(),
            self.parsed_version()?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, body: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), body).unwrap();
    }

    #[test]
    fn test_load_valid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"{
                "name": "finance",
                "display_name": "Finance",
                "description": "Income and expense tracking",
                "version": "1.2.0",
                "entry": "finance"
            }"#,
        );

        let manifest = ExtensionManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.name, "finance");
        assert_eq!(manifest.parsed_version().unwrap().minor, 2);

        let meta = manifest.metadata().unwrap();
        assert_eq!(meta.display_name, "Finance");
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ExtensionManifest::load(dir.path()),
            Err(ExtensionError::Manifest(_))
        ));
    }

    #[test]
    fn test_invalid_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(
            dir.path(),
            r#"{"name": "x", "version": "not-a-version", "entry": "x"}"#,
        );
        assert!(ExtensionManifest::load(dir.path()).is_err());
    }

    #[test]
    fn test_display_name_defaults_to_name() {
        let manifest = ExtensionManifest {
            name: "work".into(),
            display_name: String::new(),
            description: String::new(),
            version: "0.1.0".into(),
            entry: "work".into(),
            config: Default::default(),
        };
        assert_eq!(manifest.metadata().unwrap().display_name, "work");
    }
}
