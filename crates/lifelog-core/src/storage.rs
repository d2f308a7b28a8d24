//! Storage collaborator interface.
//!
//! The core does not own a database. It consumes a transactional record
//! store through this trait: generic CRUD over extension-owned domain
//! records plus the read-query execution primitive used by the query safety
//! gate. The SQLite implementation lives in `lifelog-storage`.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::JsonMap;

/// Storage error types surfaced to the core.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record or row not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid collection or field identifier.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Generic record store for extension-owned domain records.
///
/// Records are addressed by collection name and scoped to a user. Field
/// values travel as JSON maps so extensions can define their own shapes
/// without the core knowing about them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record, returning its id.
    async fn insert(
        &self,
        collection: &str,
        user_id: i64,
        fields: JsonMap,
    ) -> Result<i64, StorageError>;

    /// Fetch a record by id.
    async fn fetch(
        &self,
        collection: &str,
        user_id: i64,
        id: i64,
    ) -> Result<Option<JsonMap>, StorageError>;

    /// Update fields of a record. Returns false if it does not exist.
    async fn update(
        &self,
        collection: &str,
        user_id: i64,
        id: i64,
        fields: JsonMap,
    ) -> Result<bool, StorageError>;

    /// Delete a record. Returns false if it does not exist.
    async fn delete(&self, collection: &str, user_id: i64, id: i64) -> Result<bool, StorageError>;

    /// Execute a read-only query and return rows as ordered field/value
    /// maps. Callers are expected to have validated the statement through
    /// the query safety gate first.
    async fn query_rows(&self, sql: &str) -> Result<Vec<JsonMap>, StorageError>;
}
