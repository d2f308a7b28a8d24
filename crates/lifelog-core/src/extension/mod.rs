//! Extension system: capability contract, manifest discovery, and the
//! lifecycle manager.
//!
//! An extension is a handler for one domain (finance records, work records).
//! Each one lives in its own directory under the configured extension root
//! with an `extension.json` manifest naming a registered factory; the
//! manager discovers manifests, builds instances through the factories, and
//! tracks lifecycle state with support for zero-downtime reload of the
//! on-disk definition.

mod manager;
mod manifest;
mod types;

pub use manager::ExtensionManager;
pub use manifest::{ExtensionManifest, MANIFEST_FILE};
pub use types::{
    DynExtension, Extension, ExtensionError, ExtensionFactory, ExtensionInfo, ExtensionMetadata,
    ExtensionState, Result,
};
