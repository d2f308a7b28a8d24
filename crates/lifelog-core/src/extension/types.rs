//! Extension trait, metadata, lifecycle states, and errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::LlmBackend;
use crate::message::{ChannelRequest, ChannelResponse, JsonMap};
use crate::storage::RecordStore;

use super::manifest::ExtensionManifest;

/// Result type for extension operations.
pub type Result<T> = std::result::Result<T, ExtensionError>;

/// Extension errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("extension not found: {0}")]
    NotFound(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("no factory registered for entry: {0}")]
    UnknownEntry(String),

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Extension identity, used verbatim in AI routing prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    /// Unique extension name.
    pub name: String,
    /// Display name.
    pub display_name: String,
    /// Free-text description. The router feeds this to the AI, so it should
    /// say what kinds of requests the extension handles.
    pub description: String,
    /// Extension version.
    pub version: semver::Version,
}

impl ExtensionMetadata {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        version: semver::Version,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: description.into(),
            version,
        }
    }
}

/// Lifecycle state of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    /// Manifest seen on disk, not yet loaded.
    #[default]
    Discovered,
    /// Loaded, initialized, and registered.
    Active,
    /// Load or reload failed.
    Error,
    /// Explicitly unloaded.
    Unloaded,
}

impl ExtensionState {
    /// Whether `next` is a permitted transition from this state.
    ///
    /// Permitted: Discovered -> Active | Error, Active -> Unloaded,
    /// Unloaded | Error -> Active, and Unloaded | Error -> Error when a
    /// reload attempt fails.
    pub fn can_transition(self, next: ExtensionState) -> bool {
        use ExtensionState::*;
        matches!(
            (self, next),
            (Discovered, Active)
                | (Discovered, Error)
                | (Active, Unloaded)
                | (Unloaded, Active)
                | (Unloaded, Error)
                | (Error, Active)
                | (Error, Error)
        )
    }
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Active => write!(f, "active"),
            Self::Error => write!(f, "error"),
            Self::Unloaded => write!(f, "unloaded"),
        }
    }
}

/// The extension capability contract.
///
/// Implementations run with full process trust; there is no sandbox.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Extension identity.
    fn metadata(&self) -> &ExtensionMetadata;

    /// Initialize with the storage and AI handles. Called once before the
    /// extension enters the live set.
    async fn initialize(
        &mut self,
        storage: Arc<dyn RecordStore>,
        ai: Arc<dyn LlmBackend>,
    ) -> Result<()>;

    /// Handle one routed request.
    ///
    /// `context` is the user's conversation state map and `params` the
    /// AI-decided parameters (the routed action tag arrives under the
    /// reserved `action` key). A domain-level failure is an `Ok` response
    /// with `success == false`; `Err` is reserved for unexpected faults.
    async fn execute(
        &self,
        request: &ChannelRequest,
        context: &JsonMap,
        params: &JsonMap,
    ) -> Result<ChannelResponse>;

    /// Release resources before removal from the live set.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// A live extension handle.
///
/// Callers capture the handle once per request; a reload occurring mid-flight
/// lets the in-progress call finish against the pre-reload instance.
pub type DynExtension = Arc<tokio::sync::RwLock<Box<dyn Extension>>>;

/// Builds extension instances from their on-disk manifest.
///
/// Factories are registered explicitly by the composition root, keyed by the
/// manifest's `entry` field. "Reload" rebuilds the instance from a fresh
/// read of the manifest.
pub trait ExtensionFactory: Send + Sync {
    /// Build an uninitialized instance for the given manifest.
    fn build(&self, manifest: &ExtensionManifest) -> Result<Box<dyn Extension>>;
}

/// Introspection record returned by [`ExtensionManager::list`].
///
/// [`ExtensionManager::list`]: super::ExtensionManager::list
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub state: ExtensionState,
}
