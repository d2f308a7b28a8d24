//! Safe execution of validated read queries.

use std::sync::Arc;

use thiserror::Error;

use crate::message::JsonMap;
use crate::storage::RecordStore;

use super::safety::validate;

/// Row cap appended when the statement does not declare its own.
pub const DEFAULT_MAX_ROWS: usize = 100;

/// Query gate errors. `Rejected` and `Failed` are distinct so callers can
/// tell the user "query was blocked" versus "query failed to run".
#[derive(Debug, Error)]
pub enum QueryError {
    /// The statement violated the safety policy and was never executed.
    #[error("query rejected: {0}")]
    Rejected(String),

    /// The statement passed validation but failed at the storage layer.
    #[error("query failed: {0}")]
    Failed(String),
}

/// Validates, bounds, and executes AI-generated read queries.
pub struct QueryService {
    store: Arc<dyn RecordStore>,
}

impl QueryService {
    /// Create a service over the given record store.
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Validate and execute a generated query for one user.
    ///
    /// The caller's user id is substituted into any `{user_id}` placeholder
    /// and a `LIMIT` is appended when the statement does not already declare
    /// one.
    pub async fn execute(
        &self,
        sql: &str,
        user_id: i64,
        max_rows: usize,
    ) -> Result<Vec<JsonMap>, QueryError> {
        validate(sql)?;

        let mut statement = sql.trim().replace("{user_id}", &user_id.to_string());

        if !statement.to_uppercase().contains("LIMIT") {
            let base = statement.trim_end().trim_end_matches(';').to_string();
            statement = format!("{} LIMIT {}", base, max_rows);
        }

        tracing::debug!(user_id, sql = %statement, "executing generated query");

        self.store
            .query_rows(&statement)
            .await
            .map_err(|e| QueryError::Failed(e.to_string()))
    }

    /// Compact text rendering of query results for channels without rich
    /// display. Single-cell aggregate results are shown inline; everything
    /// else becomes a pipe-separated table capped at 20 rows.
    pub fn format_results(rows: &[JsonMap], summary: &str) -> String {
        if rows.is_empty() {
            return format!("No matching records.\n\n{}", summary);
        }

        if rows.len() == 1 && rows[0].len() == 1 {
            if let Some(value) = rows[0].values().next() {
                if value.is_number() {
                    return format!("{}\n\n** {} **", summary, value);
                }
            }
        }

        let headers: Vec<&str> = rows[0].keys().map(|k| k.as_str()).collect();
        let mut out = format!("{}\n\n", summary);
        out.push_str(&headers.join(" | "));
        out.push('\n');
        out.push_str(&"-".repeat(headers.join(" | ").len().min(80)));
        out.push('\n');

        for row in rows.iter().take(20) {
            let values: Vec<String> = headers
                .iter()
                .map(|h| match row.get(*h) {
                    Some(serde_json::Value::Null) | None => "N/A".to_string(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                })
                .collect();
            out.push_str(&values.join(" | "));
            out.push('\n');
        }

        if rows.len() > 20 {
            out.push_str(&format!("\n... {} more rows\n", rows.len() - 20));
        }

        out
    }
}
