//! Factories and registration for the built-in extensions.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use lifelog_core::extension::{
    Extension, ExtensionFactory, ExtensionManager, ExtensionManifest, Result, MANIFEST_FILE,
};

use crate::finance::FinanceExtension;
use crate::work::WorkExtension;

/// Builds [`FinanceExtension`] instances.
pub struct FinanceFactory;

impl ExtensionFactory for FinanceFactory {
    fn build(&self, manifest: &ExtensionManifest) -> Result<Box<dyn Extension>> {
        Ok(Box::new(FinanceExtension::new(manifest.metadata()?)))
    }
}

/// Builds [`WorkExtension`] instances.
pub struct WorkFactory;

impl ExtensionFactory for WorkFactory {
    fn build(&self, manifest: &ExtensionManifest) -> Result<Box<dyn Extension>> {
        Ok(Box::new(WorkExtension::new(manifest.metadata()?)))
    }
}

/// Register the built-in factories with a manager. Manifests select them
/// through their `entry` field.
pub async fn register_builtins(manager: &ExtensionManager) {
    manager.register_factory("finance", Arc::new(FinanceFactory)).await;
    manager.register_factory("work", Arc::new(WorkFactory)).await;
}

/// Write default manifests for the built-in extensions into an extension
/// directory, skipping any that already exist.
pub fn write_default_manifests(dir: &Path) -> std::io::Result<()> {
    let defaults = [
        (
            "finance",
            json!({
                "name": "finance",
                "display_name": "Finance",
                "description": "Income and expense records: add spending or income from natural language, query and summarize financial data.",
                "version": "1.0.0",
                "entry": "finance",
            }),
        ),
        (
            "work",
            json!({
                "name": "work",
                "display_name": "Work",
                "description": "Work task records: log tasks with durations, query and summarize time spent.",
                "version": "1.0.0",
                "entry": "work",
            }),
        ),
    ];

    for (name, manifest) in defaults {
        let ext_dir = dir.join(name);
        let path = ext_dir.join(MANIFEST_FILE);
        if path.exists() {
            continue;
        }
        std::fs::create_dir_all(&ext_dir)?;
        std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    }

    Ok(())
}
