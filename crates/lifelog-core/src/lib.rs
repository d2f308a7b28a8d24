//! Core traits and types for Lifelog.
//!
//! This crate defines the extension runtime (discovery, lifecycle, hot
//! reload), the AI-driven request router, the inbound-message deduplication
//! guard, the generated-query safety gate, and the bounded dispatcher that
//! channel adapters feed. Persistence and LLM backends are implemented in
//! sibling crates against the interfaces defined here.

pub mod config;
pub mod context;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod extension;
pub mod llm;
pub mod message;
pub mod query;
pub mod routing;
pub mod storage;

pub use error::{Error, Result};
pub use message::{Channel, ChannelRequest, ChannelResponse, JsonMap};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{Config, LlmConfig};
    pub use crate::context::{
        ContextStore, ContextUpdate, ConversationContext, ConversationTurn, TurnData,
        MAX_RETAINED_TURNS,
    };
    pub use crate::dedup::MessageDeduplicator;
    pub use crate::dispatch::MessageDispatcher;
    pub use crate::error::{Error, Result};
    pub use crate::extension::{
        DynExtension, Extension, ExtensionError, ExtensionFactory, ExtensionInfo,
        ExtensionManager, ExtensionManifest, ExtensionMetadata, ExtensionState,
    };
    pub use crate::llm::{LlmBackend, LlmError};
    pub use crate::message::{Channel, ChannelRequest, ChannelResponse, JsonMap};
    pub use crate::query::{QueryError, QueryService};
    pub use crate::routing::{Router, RoutingDecision};
    pub use crate::storage::{RecordStore, StorageError};
}
