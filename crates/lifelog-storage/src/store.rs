//! SQLite store.
//!
//! A single connection guarded by an async mutex; every unit of work is its
//! own transaction, committed or rolled back before the lock is released on
//! any exit path.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tokio::sync::Mutex;

use lifelog_core::context::{
    ContextStore, ContextUpdate, ConversationContext, ConversationTurn, TurnData,
    MAX_RETAINED_TURNS,
};
use lifelog_core::message::JsonMap;
use lifelog_core::storage::{RecordStore, StorageError};

use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversation_contexts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL UNIQUE,
    current_intent TEXT,
    current_domain TEXT,
    state TEXT NOT NULL DEFAULT '{}',
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS conversation_turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    user_input TEXT NOT NULL,
    intent TEXT,
    domain TEXT,
    response TEXT NOT NULL,
    turn_metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_turns_user_time
    ON conversation_turns (user_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS finance_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    type TEXT NOT NULL DEFAULT 'expense',
    amount REAL NOT NULL DEFAULT 0,
    primary_category TEXT,
    secondary_category TEXT,
    description TEXT,
    payment_method TEXT,
    merchant TEXT,
    tags TEXT,
    raw_text TEXT,
    record_date TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_finance_user_date
    ON finance_records (user_id, record_date);

CREATE TABLE IF NOT EXISTS work_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    task_type TEXT,
    task_name TEXT NOT NULL DEFAULT '',
    duration_hours REAL,
    priority TEXT,
    status TEXT,
    tags TEXT,
    raw_text TEXT,
    record_date TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_work_user_date
    ON work_records (user_id, record_date);
";

/// SQLite-backed record and context store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    pub fn memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn datetime(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn parse_map(raw: &str) -> JsonMap {
        serde_json::from_str(raw).unwrap_or_default()
    }

    fn context_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationContext> {
        let state: String = row.get("state")?;
        Ok(ConversationContext {
            user_id: row.get("user_id")?,
            current_intent: row.get("current_intent")?,
            current_domain: row.get("current_domain")?,
            state: Self::parse_map(&state),
            updated_at: Self::datetime(row.get("updated_at")?),
        })
    }

    fn turn_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationTurn> {
        let metadata: String = row.get("turn_metadata")?;
        Ok(ConversationTurn {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            timestamp: Self::datetime(row.get("timestamp")?),
            user_input: row.get("user_input")?,
            intent: row.get("intent")?,
            domain: row.get("domain")?,
            response: row.get("response")?,
            metadata: Self::parse_map(&metadata),
        })
    }

    fn get_context_inner(
        conn: &Connection,
        user_id: i64,
    ) -> Result<Option<ConversationContext>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, current_intent, current_domain, state, updated_at
             FROM conversation_contexts WHERE user_id = ?1",
        )?;
        let mut rows = stmt.query_map([user_id], Self::context_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(name: &str) -> Result<()> {
    if valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

/// Convert a JSON field value into a bindable SQLite value. Arrays and
/// objects are stored as JSON text.
fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        serde_json::Value::Null => Sql::Null,
        serde_json::Value::Bool(b) => Sql::Integer(*b as i64),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn sql_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<blob {} bytes>", b.len())),
    }
}

/// Run a prepared statement and collect rows as field/value maps in column
/// order.
fn collect_rows(conn: &Connection, sql: &str) -> Result<Vec<JsonMap>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut out = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut map = JsonMap::new();
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), sql_to_json(row.get_ref(i)?));
        }
        out.push(map);
    }
    Ok(out)
}

#[async_trait]
impl ContextStore for SqliteStore {
    async fn get_context(
        &self,
        user_id: i64,
    ) -> std::result::Result<Option<ConversationContext>, StorageError> {
        let conn = self.conn.lock().await;
        Self::get_context_inner(&conn, user_id).map_err(Into::into)
    }

    async fn get_or_create_context(
        &self,
        user_id: i64,
    ) -> std::result::Result<ConversationContext, StorageError> {
        let conn = self.conn.lock().await;

        // Idempotent create: the UNIQUE(user_id) constraint guarantees at
        // most one persisted context even when first-access races.
        conn.execute(
            "INSERT INTO conversation_contexts (user_id, state, updated_at)
             VALUES (?1, '{}', ?2)
             ON CONFLICT(user_id) DO NOTHING",
            rusqlite::params![user_id, Self::now_millis()],
        )
        .map_err(Error::from)?;

        Self::get_context_inner(&conn, user_id)?
            .ok_or_else(|| StorageError::NotFound(format!("context for user {}", user_id)))
    }

    async fn update_context(
        &self,
        user_id: i64,
        update: ContextUpdate,
    ) -> std::result::Result<ConversationContext, StorageError> {
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO conversation_contexts (user_id, state, updated_at)
             VALUES (?1, '{}', ?2)
             ON CONFLICT(user_id) DO NOTHING",
            rusqlite::params![user_id, Self::now_millis()],
        )
        .map_err(Error::from)?;

        let current = Self::get_context_inner(&conn, user_id)?
            .ok_or_else(|| StorageError::NotFound(format!("context for user {}", user_id)))?;

        let intent = update.current_intent.or(current.current_intent);
        let domain = update.current_domain.or(current.current_domain);
        let state = update.state.unwrap_or(current.state);
        let state_raw =
            serde_json::to_string(&state).map_err(|e| StorageError::Serialization(e.to_string()))?;

        conn.execute(
            "UPDATE conversation_contexts
             SET current_intent = ?2, current_domain = ?3, state = ?4, updated_at = ?5
             WHERE user_id = ?1",
            rusqlite::params![user_id, intent, domain, state_raw, Self::now_millis()],
        )
        .map_err(Error::from)?;

        Self::get_context_inner(&conn, user_id)?
            .ok_or_else(|| StorageError::NotFound(format!("context for user {}", user_id)))
    }

    async fn add_turn(
        &self,
        user_id: i64,
        turn: TurnData,
    ) -> std::result::Result<ConversationTurn, StorageError> {
        let metadata_raw = serde_json::to_string(&turn.metadata)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(Error::from)?;

        // Insert and evict in the same transaction: the retained set is
        // always a contiguous most-recent window.
        tx.execute(
            "INSERT INTO conversation_turns
                 (user_id, timestamp, user_input, intent, domain, response, turn_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                user_id,
                Self::now_millis(),
                turn.user_input,
                turn.intent,
                turn.domain,
                turn.response,
                metadata_raw,
            ],
        )
        .map_err(Error::from)?;

        let turn_id = tx.last_insert_rowid();

        tx.execute(
            "DELETE FROM conversation_turns
             WHERE user_id = ?1 AND id NOT IN (
                 SELECT id FROM conversation_turns
                 WHERE user_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2
             )",
            rusqlite::params![user_id, MAX_RETAINED_TURNS as i64],
        )
        .map_err(Error::from)?;

        tx.commit().map_err(Error::from)?;

        let recorded = conn
            .query_row(
                "SELECT id, user_id, timestamp, user_input, intent, domain, response, turn_metadata
                 FROM conversation_turns WHERE id = ?1",
                [turn_id],
                Self::turn_from_row,
            )
            .map_err(Error::from)?;

        Ok(recorded)
    }

    async fn recent_turns(
        &self,
        user_id: i64,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationTurn>, StorageError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, timestamp, user_input, intent, domain, response, turn_metadata
                 FROM conversation_turns
                 WHERE user_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(Error::from)?;

        let turns = stmt
            .query_map(
                rusqlite::params![user_id, limit as i64],
                Self::turn_from_row,
            )
            .map_err(Error::from)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::from)?;

        Ok(turns)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(
        &self,
        collection: &str,
        user_id: i64,
        fields: JsonMap,
    ) -> std::result::Result<i64, StorageError> {
        check_identifier(collection)?;
        for key in fields.keys() {
            check_identifier(key)?;
        }

        let mut columns = vec!["user_id".to_string(), "created_at".to_string()];
        let mut values = vec![
            rusqlite::types::Value::Integer(user_id),
            rusqlite::types::Value::Integer(Self::now_millis()),
        ];
        for (key, value) in &fields {
            columns.push(key.clone());
            values.push(json_to_sql(value));
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            collection,
            columns.join(", "),
            placeholders.join(", ")
        );

        let conn = self.conn.lock().await;
        conn.execute(&sql, rusqlite::params_from_iter(values))
            .map_err(Error::from)?;
        Ok(conn.last_insert_rowid())
    }

    async fn fetch(
        &self,
        collection: &str,
        user_id: i64,
        id: i64,
    ) -> std::result::Result<Option<JsonMap>, StorageError> {
        check_identifier(collection)?;

        let sql = format!(
            "SELECT * FROM {} WHERE user_id = {} AND id = {}",
            collection, user_id, id
        );
        let conn = self.conn.lock().await;
        let mut rows = collect_rows(&conn, &sql)?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    async fn update(
        &self,
        collection: &str,
        user_id: i64,
        id: i64,
        fields: JsonMap,
    ) -> std::result::Result<bool, StorageError> {
        check_identifier(collection)?;
        if fields.is_empty() {
            return Ok(false);
        }
        for key in fields.keys() {
            check_identifier(key)?;
        }

        let mut assignments = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len() + 2);
        for (i, (key, value)) in fields.iter().enumerate() {
            assignments.push(format!("{} = ?{}", key, i + 1));
            values.push(json_to_sql(value));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE user_id = ?{} AND id = ?{}",
            collection,
            assignments.join(", "),
            fields.len() + 1,
            fields.len() + 2,
        );
        values.push(rusqlite::types::Value::Integer(user_id));
        values.push(rusqlite::types::Value::Integer(id));

        let conn = self.conn.lock().await;
        let changed = conn
            .execute(&sql, rusqlite::params_from_iter(values))
            .map_err(Error::from)?;
        Ok(changed > 0)
    }

    async fn delete(
        &self,
        collection: &str,
        user_id: i64,
        id: i64,
    ) -> std::result::Result<bool, StorageError> {
        check_identifier(collection)?;

        let sql = format!("DELETE FROM {} WHERE user_id = ?1 AND id = ?2", collection);
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(&sql, rusqlite::params![user_id, id])
            .map_err(Error::from)?;
        Ok(changed > 0)
    }

    async fn query_rows(&self, sql: &str) -> std::result::Result<Vec<JsonMap>, StorageError> {
        let conn = self.conn.lock().await;
        Ok(collect_rows(&conn, sql)?)
    }
}
