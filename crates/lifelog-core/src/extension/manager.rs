//! Extension lifecycle manager.
//!
//! Discovers extension manifests on a configured directory, builds and
//! initializes instances through registered factories, and tracks lifecycle
//! state. Reload evicts the cached on-disk definition so a subsequent load
//! re-reads the current manifest, which is the only way to pick up
//! definition changes without a process restart.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::llm::LlmBackend;
use crate::storage::RecordStore;

use super::manifest::{ExtensionManifest, MANIFEST_FILE};
use super::types::{
    DynExtension, ExtensionError, ExtensionFactory, ExtensionInfo, ExtensionState, Result,
};

/// Manages discovery, loading, unloading, and reload of extensions.
pub struct ExtensionManager {
    /// Directory scanned for extension subdirectories.
    extension_dir: PathBuf,
    /// Storage handle passed to every extension's `initialize`.
    storage: Arc<dyn RecordStore>,
    /// AI handle passed to every extension's `initialize`.
    llm: Arc<dyn LlmBackend>,
    /// Registered factories, keyed by manifest `entry`.
    factories: RwLock<HashMap<String, Arc<dyn ExtensionFactory>>>,
    /// Live instances.
    extensions: RwLock<HashMap<String, DynExtension>>,
    /// Lifecycle state per known extension.
    states: RwLock<HashMap<String, ExtensionState>>,
    /// Cached on-disk definitions. Evicted on reload.
    manifests: RwLock<HashMap<String, ExtensionManifest>>,
}

impl ExtensionManager {
    /// Create a manager over the given extension directory.
    pub fn new(
        extension_dir: impl Into<PathBuf>,
        storage: Arc<dyn RecordStore>,
        llm: Arc<dyn LlmBackend>,
    ) -> Self {
        Self {
            extension_dir: extension_dir.into(),
            storage,
            llm,
            factories: RwLock::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Register a factory under the entry key manifests refer to.
    pub async fn register_factory(&self, entry: impl Into<String>, factory: Arc<dyn ExtensionFactory>) {
        let entry = entry.into();
        self.factories.write().await.insert(entry.clone(), factory);
        tracing::debug!(entry, "extension factory registered");
    }

    /// Scan the extension directory for subdirectories containing a
    /// manifest. Names are sorted so routing prompts enumerate extensions
    /// deterministically across platforms.
    pub async fn discover(&self) -> Vec<String> {
        let mut names = Vec::new();

        let entries = match std::fs::read_dir(&self.extension_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.extension_dir.display(), error = %e, "extension directory not readable");
                return names;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join(MANIFEST_FILE).exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();

        let mut states = self.states.write().await;
        for name in &names {
            states.entry(name.clone()).or_default();
        }
        drop(states);

        info!(count = names.len(), ?names, "discovered extensions");
        names
    }

    /// Discover all extensions and load each one. A single extension's
    /// failure never aborts the pass; the aggregate success count is
    /// returned.
    pub async fn discover_and_load_all(&self) -> usize {
        let names = self.discover().await;
        let mut loaded = 0;

        for name in &names {
            if self.load(name).await {
                loaded += 1;
            }
        }

        loaded
    }

    /// Load an extension by name: read its manifest, build an instance
    /// through the registered factory, initialize it, and register it as
    /// active. Any failure transitions the extension to `error` and returns
    /// false.
    pub async fn load(&self, name: &str) -> bool {
        if self.extensions.read().await.contains_key(name) {
            warn!(name, "extension already loaded");
            return true;
        }

        match self.try_load(name).await {
            Ok(version) => {
                self.set_state(name, ExtensionState::Active).await;
                info!(name, %version, "extension loaded");
                true
            }
            Err(e) => {
                error!(name, error = %e, "failed to load extension");
                self.set_state(name, ExtensionState::Error).await;
                false
            }
        }
    }

    async fn try_load(&self, name: &str) -> Result<semver::Version> {
        let manifest = self.cached_manifest(name).await?;
        let version = manifest.parsed_version()?;

        let factory = self
            .factories
            .read()
            .await
            .get(&manifest.entry)
            .cloned()
            .ok_or_else(|| ExtensionError::UnknownEntry(manifest.entry.clone()))?;

        let mut instance = factory.build(&manifest)?;
        instance
            .initialize(self.storage.clone(), self.llm.clone())
            .await?;

        self.extensions
            .write()
            .await
            .insert(name.to_string(), Arc::new(RwLock::new(instance)));

        Ok(version)
    }

    /// Unload an extension: invoke its shutdown hook and remove it from the
    /// live set. No-op with a logged warning if not loaded.
    pub async fn unload(&self, name: &str) -> bool {
        let removed = self.extensions.write().await.remove(name);

        match removed {
            Some(ext) => {
                if let Err(e) = ext.read().await.shutdown().await {
                    warn!(name, error = %e, "extension shutdown reported an error");
                }
                self.set_state(name, ExtensionState::Unloaded).await;
                info!(name, "extension unloaded");
                true
            }
            None => {
                warn!(name, "extension not loaded");
                false
            }
        }
    }

    /// Hot-reload an extension: unload if present, evict the cached
    /// definition so load re-reads the current on-disk manifest, then load
    /// again.
    pub async fn reload(&self, name: &str) -> bool {
        info!(name, "reloading extension");

        if self.extensions.read().await.contains_key(name) {
            self.unload(name).await;
        }

        self.manifests.write().await.remove(name);

        self.load(name).await
    }

    /// Get a live extension handle by name.
    pub async fn get(&self, name: &str) -> Option<DynExtension> {
        self.extensions.read().await.get(name).cloned()
    }

    /// Current state of an extension, if known.
    pub async fn state(&self, name: &str) -> Option<ExtensionState> {
        self.states.read().await.get(name).copied()
    }

    /// List all known extensions with identity and state, sorted by name.
    /// Used by the router to build AI prompts and by operators to audit
    /// state.
    pub async fn list(&self) -> Vec<ExtensionInfo> {
        let states: Vec<(String, ExtensionState)> = {
            let states = self.states.read().await;
            let mut pairs: Vec<_> = states.iter().map(|(k, v)| (k.clone(), *v)).collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            pairs
        };

        let mut infos = Vec::with_capacity(states.len());
        for (name, state) in states {
            if let Some(ext) = self.get(&name).await {
                let ext = ext.read().await;
                let meta = ext.metadata();
                infos.push(ExtensionInfo {
                    name: meta.name.clone(),
                    display_name: meta.display_name.clone(),
                    description: meta.description.clone(),
                    version: meta.version.to_string(),
                    state,
                });
            } else {
                let manifest = self.cached_manifest(&name).await.ok();
                let (display_name, description, version) = manifest
                    .map(|m| (m.display_name.clone(), m.description.clone(), m.version))
                    .unwrap_or_default();
                infos.push(ExtensionInfo {
                    name,
                    display_name,
                    description,
                    version,
                    state,
                });
            }
        }

        infos
    }

    /// Number of live extensions.
    pub async fn count(&self) -> usize {
        self.extensions.read().await.len()
    }

    async fn cached_manifest(&self, name: &str) -> Result<ExtensionManifest> {
        if let Some(manifest) = self.manifests.read().await.get(name) {
            return Ok(manifest.clone());
        }

        let manifest = ExtensionManifest::load(&self.extension_dir.join(name))?;
        self.manifests
            .write()
            .await
            .insert(name.to_string(), manifest.clone());
        Ok(manifest)
    }

    async fn set_state(&self, name: &str, next: ExtensionState) {
        let mut states = self.states.write().await;
        if let Some(current) = states.get(name) {
            if *current != next && !current.can_transition(next) {
                warn!(name, from = %current, to = %next, "unexpected state transition");
            }
        }
        states.insert(name.to_string(), next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::message::{ChannelRequest, ChannelResponse, JsonMap};
    use crate::storage::StorageError;
    use async_trait::async_trait;

    struct NullStore;

    #[async_trait]
    impl RecordStore for NullStore {
        async fn insert(&self, _: &str, _: i64, _: JsonMap) -> std::result::Result<i64, StorageError> {
            Ok(1)
        }
        async fn fetch(
            &self,
            _: &str,
            _: i64,
            _: i64,
        ) -> std::result::Result<Option<JsonMap>, StorageError> {
            Ok(None)
        }
        async fn update(
            &self,
            _: &str,
            _: i64,
            _: i64,
            _: JsonMap,
        ) -> std::result::Result<bool, StorageError> {
            Ok(false)
        }
        async fn delete(&self, _: &str, _: i64, _: i64) -> std::result::Result<bool, StorageError> {
            Ok(false)
        }
        async fn query_rows(&self, _: &str) -> std::result::Result<Vec<JsonMap>, StorageError> {
            Ok(Vec::new())
        }
    }

    struct NullLlm;

    #[async_trait]
    impl LlmBackend for NullLlm {
        async fn generate(&self, _: &str) -> std::result::Result<String, LlmError> {
            Err(LlmError::Backend("no model in tests".into()))
        }
    }

    struct TestExtension {
        meta: super::super::ExtensionMetadata,
        fail_init: bool,
    }

    #[async_trait]
    impl super::super::Extension for TestExtension {
        fn metadata(&self) -> &super::super::ExtensionMetadata {
            &self.meta
        }

        async fn initialize(
            &mut self,
            _storage: Arc<dyn RecordStore>,
            _ai: Arc<dyn LlmBackend>,
        ) -> Result<()> {
            if self.fail_init {
                Err(ExtensionError::InitializationFailed("refused".into()))
            } else {
                Ok(())
            }
        }

        async fn execute(
            &self,
            _request: &ChannelRequest,
            _context: &JsonMap,
            _params: &JsonMap,
        ) -> Result<ChannelResponse> {
            Ok(ChannelResponse::ok("handled"))
        }
    }

    struct TestFactory {
        fail_init: bool,
    }

    impl ExtensionFactory for TestFactory {
        fn build(&self, manifest: &ExtensionManifest) -> Result<Box<dyn super::super::Extension>> {
            Ok(Box::new(TestExtension {
                meta: manifest.metadata()?,
                fail_init: self.fail_init,
            }))
        }
    }

    fn write_manifest(dir: &std::path::Path, name: &str, version: &str, entry: &str) {
        let ext_dir = dir.join(name);
        std::fs::create_dir_all(&ext_dir).unwrap();
        std::fs::write(
            ext_dir.join(MANIFEST_FILE),
            serde_json::json!({
                "name": name,
                "display_name": name,
                "description": format!("{} records", name),
                "version": version,
                "entry": entry,
            })
            .to_string(),
        )
        .unwrap();
    }

    async fn manager_with(dir: &std::path::Path) -> ExtensionManager {
        let manager = ExtensionManager::new(dir, Arc::new(NullStore), Arc::new(NullLlm));
        manager
            .register_factory("good", Arc::new(TestFactory { fail_init: false }))
            .await;
        manager
            .register_factory("bad", Arc::new(TestFactory { fail_init: true }))
            .await;
        manager
    }

    #[tokio::test]
    async fn test_discover_returns_sorted_names() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "work", "1.0.0", "good");
        write_manifest(dir.path(), "finance", "1.0.0", "good");
        std::fs::create_dir_all(dir.path().join("not-an-extension")).unwrap();

        let manager = manager_with(dir.path()).await;
        let names = manager.discover().await;
        assert_eq!(names, vec!["finance".to_string(), "work".to_string()]);
        assert_eq!(
            manager.state("finance").await,
            Some(ExtensionState::Discovered)
        );
    }

    #[tokio::test]
    async fn test_load_transitions_to_active() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "finance", "1.0.0", "good");

        let manager = manager_with(dir.path()).await;
        manager.discover().await;

        assert!(manager.load("finance").await);
        assert_eq!(manager.state("finance").await, Some(ExtensionState::Active));
        assert!(manager.get("finance").await.is_some());
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn test_failing_initialize_isolated() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "finance", "1.0.0", "good");
        write_manifest(dir.path(), "broken", "1.0.0", "bad");

        let manager = manager_with(dir.path()).await;
        let loaded = manager.discover_and_load_all().await;

        assert_eq!(loaded, 1);
        assert_eq!(manager.state("broken").await, Some(ExtensionState::Error));
        assert!(manager.get("broken").await.is_none());
        // The failure did not disturb the healthy extension.
        assert_eq!(manager.state("finance").await, Some(ExtensionState::Active));
        assert!(manager.get("finance").await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_entry_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "ghost", "1.0.0", "no-such-factory");

        let manager = manager_with(dir.path()).await;
        assert!(!manager.load("ghost").await);
        assert_eq!(manager.state("ghost").await, Some(ExtensionState::Error));
    }

    #[tokio::test]
    async fn test_unload() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "finance", "1.0.0", "good");

        let manager = manager_with(dir.path()).await;
        assert!(manager.load("finance").await);
        assert!(manager.unload("finance").await);
        assert_eq!(
            manager.state("finance").await,
            Some(ExtensionState::Unloaded)
        );
        assert!(manager.get("finance").await.is_none());

        // Unloading again is a no-op.
        assert!(!manager.unload("finance").await);
    }

    #[tokio::test]
    async fn test_reload_picks_up_changed_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "finance", "1.0.0", "good");

        let manager = manager_with(dir.path()).await;
        assert!(manager.load("finance").await);

        let before = manager.list().await;
        assert_eq!(before[0].version, "1.0.0");

        // The on-disk definition changes between the original load and the
        // reload call.
        write_manifest(dir.path(), "finance", "2.0.0", "good");

        assert!(manager.reload("finance").await);
        assert_eq!(manager.state("finance").await, Some(ExtensionState::Active));

        let after = manager.list().await;
        assert_eq!(after[0].version, "2.0.0");
    }

    #[tokio::test]
    async fn test_reload_from_error_state() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "flaky", "1.0.0", "bad");

        let manager = manager_with(dir.path()).await;
        assert!(!manager.load("flaky").await);
        assert_eq!(manager.state("flaky").await, Some(ExtensionState::Error));

        // Fixed on disk: point the manifest at the working factory.
        write_manifest(dir.path(), "flaky", "1.0.1", "good");

        assert!(manager.reload("flaky").await);
        assert_eq!(manager.state("flaky").await, Some(ExtensionState::Active));
    }

    #[tokio::test]
    async fn test_list_includes_unloaded() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "finance", "1.0.0", "good");
        write_manifest(dir.path(), "work", "1.0.0", "good");

        let manager = manager_with(dir.path()).await;
        manager.discover_and_load_all().await;
        manager.unload("work").await;

        let infos = manager.list().await;
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].name, "finance");
        assert_eq!(infos[0].state, ExtensionState::Active);
        assert_eq!(infos[1].name, "work");
        assert_eq!(infos[1].state, ExtensionState::Unloaded);
    }
}
