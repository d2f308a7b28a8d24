//! Work extension: task and time records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use lifelog_core::extension::{Extension, ExtensionError, ExtensionMetadata, Result};
use lifelog_core::llm::LlmBackend;
use lifelog_core::message::{ChannelRequest, ChannelResponse, JsonMap};
use lifelog_core::query::{QueryError, QueryService, DEFAULT_MAX_ROWS};
use lifelog_core::storage::RecordStore;

use crate::format::markdown_table;

const COLLECTION: &str = "work_records";

const SCHEMA_DOC: &str = "\
Table work_records:
- id: primary key
- user_id: owning user
- task_type: e.g. development, meeting, documentation, learning
- task_name: short task title
- duration_hours: REAL
- priority: high/medium/low
- status: todo/in_progress/completed/cancelled
- tags: JSON array as text
- raw_text: original input
- record_date: 'YYYY-MM-DD'
- created_at: unix millis";

/// Handles work task records and work queries.
pub struct WorkExtension {
    meta: ExtensionMetadata,
    storage: Option<Arc<dyn RecordStore>>,
    ai: Option<Arc<dyn LlmBackend>>,
    query: Option<QueryService>,
}

impl WorkExtension {
    pub fn new(meta: ExtensionMetadata) -> Self {
        Self {
            meta,
            storage: None,
            ai: None,
            query: None,
        }
    }

    fn ai(&self) -> Result<&Arc<dyn LlmBackend>> {
        self.ai
            .as_ref()
            .ok_or_else(|| ExtensionError::ExecutionFailed("extension not initialized".into()))
    }

    async fn add_records(&self, request: &ChannelRequest, user_id: i64) -> Result<ChannelResponse> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        let prompt = format!(
            "Extract work records from the user input.\n\n\
             User input: {input}\n\
             Today's date: {today}\n\n\
             Respond with a single JSON object:\n\
             {{\"records\": [{{\"task_name\": \"...\", \"task_type\": \"...\", \
             \"duration_hours\": <number>, \"status\": \"completed\", \
             \"record_date\": \"YYYY-MM-DD\"}}]}}\n\n\
             Rules: one entry per distinct task; duration_hours is a bare \
             number; record_date defaults to today.",
            input = request.input_text,
            today = today,
        );

        let extraction = self
            .ai()?
            .generate_json(&prompt)
            .await
            .map_err(|e| ExtensionError::ExecutionFailed(e.to_string()))?;

        let records = extraction
            .get("records")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        if records.is_empty() {
            return Ok(ChannelResponse::failure(
                "no work records recognized in the input",
            ));
        }

        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| ExtensionError::ExecutionFailed("extension not initialized".into()))?;

        let mut inserted = 0usize;
        let mut total_hours = 0.0f64;
        let mut first_task = String::new();

        for record in &records {
            let task_name = record
                .get("task_name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if task_name.is_empty() {
                warn!(user_id, "skipping work record without a task name");
                continue;
            }

            let hours = record
                .get("duration_hours")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            let mut fields = JsonMap::new();
            fields.insert("task_name".into(), json!(task_name.clone()));
            fields.insert("duration_hours".into(), json!(hours));
            for key in ["task_type", "priority", "status"] {
                if let Some(value) = record.get(key).and_then(|v| v.as_str()) {
                    fields.insert(key.into(), json!(value));
                }
            }
            fields.insert(
                "record_date".into(),
                json!(record
                    .get("record_date")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&today)),
            );
            fields.insert("raw_text".into(), json!(request.input_text));

            match storage.insert(COLLECTION, user_id, fields).await {
                Ok(_) => {
                    if inserted == 0 {
                        first_task = task_name;
                    }
                    inserted += 1;
                    total_hours += hours;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "failed to insert work record");
                }
            }
        }

        if inserted == 0 {
            return Ok(ChannelResponse::failure("no records could be added"));
        }

        let message = if inserted == 1 {
            format!("Logged: {} ({:.1}h)", first_task, total_hours)
        } else {
            format!("Logged {} tasks totaling {:.1}h", inserted, total_hours)
        };

        Ok(ChannelResponse::ok(message)
            .with_data(json!({"count": inserted, "total_hours": total_hours})))
    }

    async fn run_query(&self, request: &ChannelRequest, user_id: i64) -> Result<ChannelResponse> {
        let prompt = format!(
            "{schema}\n\n\
             User query: {input}\n\
             Current date: {today}\n\n\
             Generate a SQLite SELECT statement answering the query.\n\
             Rules: filter by user_id = {{user_id}}; aggregate hours with SUM \
             where the question asks for totals; keep LIMIT at or below 100; \
             no comments, no other statements.\n\n\
             Respond with a single JSON object:\n\
             {{\"sql\": \"SELECT ...\", \"explanation\": \"one sentence\"}}",
            schema = SCHEMA_DOC,
            input = request.input_text,
            today = Utc::now().format("%Y-%m-%d"),
        );

        let generated = self
            .ai()?
            .generate_json(&prompt)
            .await
            .map_err(|e| ExtensionError::ExecutionFailed(e.to_string()))?;

        let sql = generated
            .get("sql")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if sql.is_empty() {
            return Ok(ChannelResponse::failure("could not generate a query"));
        }

        let explanation = generated
            .get("explanation")
            .and_then(|v| v.as_str())
            .unwrap_or("Query result")
            .to_string();

        debug!(user_id, sql = %sql, "generated work query");

        let query = self
            .query
            .as_ref()
            .ok_or_else(|| ExtensionError::ExecutionFailed("extension not initialized".into()))?;

        let rows = match query.execute(&sql, user_id, DEFAULT_MAX_ROWS).await {
            Ok(rows) => rows,
            Err(QueryError::Rejected(reason)) => {
                return Ok(ChannelResponse::failure(format!(
                    "query blocked by safety policy: {}",
                    reason
                )));
            }
            Err(QueryError::Failed(reason)) => {
                return Ok(ChannelResponse::failure(format!(
                    "query failed to run: {}",
                    reason
                )));
            }
        };

        if rows.is_empty() {
            return Ok(ChannelResponse::ok("No matching work records.")
                .with_data(json!({"rows_count": 0})));
        }

        Ok(ChannelResponse::ok(explanation)
            .with_data(json!({"rows_count": rows.len()}))
            .with_metadata("markdown", json!(markdown_table(&rows))))
    }
}

#[async_trait]
impl Extension for WorkExtension {
    fn metadata(&self) -> &ExtensionMetadata {
        &self.meta
    }

    async fn initialize(
        &mut self,
        storage: Arc<dyn RecordStore>,
        ai: Arc<dyn LlmBackend>,
    ) -> Result<()> {
        self.query = Some(QueryService::new(storage.clone()));
        self.storage = Some(storage);
        self.ai = Some(ai);
        Ok(())
    }

    async fn execute(
        &self,
        request: &ChannelRequest,
        _context: &JsonMap,
        params: &JsonMap,
    ) -> Result<ChannelResponse> {
        let user_id: i64 = match request.user_id.parse() {
            Ok(id) => id,
            Err(_) => {
                return Ok(ChannelResponse::failure(format!(
                    "user id '{}' is not numeric",
                    request.user_id
                )))
            }
        };

        match params.get("action").and_then(|v| v.as_str()) {
            Some("query") => self.run_query(request, user_id).await,
            // Adding is the default: most work messages are logs.
            _ => self.add_records(request, user_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifelog_core::message::Channel;
    use lifelog_llm::MockBackend;
    use lifelog_storage::SqliteStore;

    fn params(action: &str) -> JsonMap {
        let mut map = JsonMap::new();
        map.insert("action".into(), json!(action));
        map
    }

    async fn initialized(mock: Arc<MockBackend>, store: Arc<SqliteStore>) -> WorkExtension {
        let meta = ExtensionMetadata::new(
            "work",
            "Work",
            "task and time records",
            semver::Version::new(1, 0, 0),
        );
        let mut ext = WorkExtension::new(meta);
        ext.initialize(store, mock).await.unwrap();
        ext
    }

    #[tokio::test]
    async fn test_add_work_record() {
        let mock = Arc::new(MockBackend::new());
        mock.push_response(json!({
            "records": [{
                "task_name": "auth module",
                "task_type": "development",
                "duration_hours": 4.0,
                "status": "completed"
            }]
        }));
        let store = Arc::new(SqliteStore::memory().unwrap());
        let ext = initialized(mock, store.clone()).await;

        let request = ChannelRequest::new("1", "worked 4 hours on the auth module", Channel::Cli);
        let response = ext
            .execute(&request, &JsonMap::new(), &params("add"))
            .await
            .unwrap();

        assert!(response.success, "error: {:?}", response.error);
        assert!(response.message.contains("auth module"));
        assert!(response.message.contains("4.0h"));
    }

    #[tokio::test]
    async fn test_query_total_hours() {
        let store = Arc::new(SqliteStore::memory().unwrap());
        for (name, hours) in [("auth module", 4.0), ("standup", 0.5)] {
            let mut fields = JsonMap::new();
            fields.insert("task_name".into(), json!(name));
            fields.insert("duration_hours".into(), json!(hours));
            lifelog_core::storage::RecordStore::insert(store.as_ref(), "work_records", 1, fields)
                .await
                .unwrap();
        }

        let mock = Arc::new(MockBackend::new());
        mock.push_response(json!({
            "sql": "SELECT SUM(duration_hours) AS hours FROM work_records WHERE user_id = {user_id}",
            "explanation": "Hours worked"
        }));
        let ext = initialized(mock, store).await;

        let request = ChannelRequest::new("1", "how long did I work", Channel::Cli);
        let response = ext
            .execute(&request, &JsonMap::new(), &params("query"))
            .await
            .unwrap();

        assert!(response.success);
        assert!(response.metadata["markdown"]
            .as_str()
            .unwrap()
            .contains("4.5"));
    }

    #[tokio::test]
    async fn test_records_without_task_name_skipped() {
        let mock = Arc::new(MockBackend::new());
        mock.push_response(json!({"records": [{"duration_hours": 2.0}]}));
        let store = Arc::new(SqliteStore::memory().unwrap());
        let ext = initialized(mock, store).await;

        let request = ChannelRequest::new("1", "did some stuff", Channel::Cli);
        let response = ext
            .execute(&request, &JsonMap::new(), &params("add"))
            .await
            .unwrap();

        assert!(!response.success);
    }
}
