//! Per-user conversational memory.
//!
//! Each user has exactly one live [`ConversationContext`] plus a bounded
//! window of recent [`ConversationTurn`]s. The router reads both before
//! every AI decision and appends a turn after every extension invocation.
//! Persistence is behind the [`ContextStore`] trait so tests can substitute
//! an in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::JsonMap;
use crate::storage::StorageError;

/// Maximum number of turns retained per user. Inserting a turn beyond this
/// limit evicts the oldest in the same transaction as the insert.
pub const MAX_RETAINED_TURNS: usize = 10;

/// Current conversation state for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Owning user.
    pub user_id: i64,
    /// Intent tag from the most recent routed turn.
    pub current_intent: Option<String>,
    /// Domain tag from the most recent routed turn.
    pub current_domain: Option<String>,
    /// Open-ended state carried between turns.
    #[serde(default)]
    pub state: JsonMap,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One recorded input/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Storage-assigned id.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
    /// Raw user input.
    pub user_input: String,
    /// Resolved intent (the routed action tag).
    pub intent: Option<String>,
    /// Resolved domain (the extension that handled it).
    pub domain: Option<String>,
    /// Response text the user received.
    pub response: String,
    /// Turn metadata.
    #[serde(default)]
    pub metadata: JsonMap,
}

/// Data for a new turn, before storage assigns id and timestamp.
#[derive(Debug, Clone, Default)]
pub struct TurnData {
    pub user_input: String,
    pub intent: Option<String>,
    pub domain: Option<String>,
    pub response: String,
    pub metadata: JsonMap,
}

/// Partial context update. `Some` fields are written, `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub current_intent: Option<String>,
    pub current_domain: Option<String>,
    pub state: Option<JsonMap>,
}

/// Bounded per-user conversational memory.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Get a user's context, if one exists.
    async fn get_context(&self, user_id: i64) -> Result<Option<ConversationContext>, StorageError>;

    /// Get or create a user's context. Creation is idempotent: concurrent
    /// first-access races must still yield at most one persisted context per
    /// user, enforced by a uniqueness constraint at the storage layer.
    async fn get_or_create_context(&self, user_id: i64)
        -> Result<ConversationContext, StorageError>;

    /// Merge fields into the context and stamp the update time.
    async fn update_context(
        &self,
        user_id: i64,
        update: ContextUpdate,
    ) -> Result<ConversationContext, StorageError>;

    /// Insert a turn and evict everything beyond the most recent
    /// [`MAX_RETAINED_TURNS`], as a single atomic unit.
    async fn add_turn(&self, user_id: i64, turn: TurnData)
        -> Result<ConversationTurn, StorageError>;

    /// Most-recent-first turns, capped at `limit`.
    async fn recent_turns(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StorageError>;
}
