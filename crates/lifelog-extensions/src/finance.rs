//! Finance extension: income and expense records.

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

const COLLECTION: &str = "finance_records";

const SCHEMA_DOC: &str = "\
Table finance_records:
- id: primary key
- user_id: owning user
- type: 'income' or 'expense'
- amount: REAL
- primary_category: e.g. food, transport, shopping, salary
- secondary_category: e.g. lunch, taxi, coffee
- description: free text
- payment_method: optional
- merchant: optional
- tags: JSON array as text
- raw_text: original input
- record_date: 'YYYY-MM-DD'
- created_at: unix millis";

/// Handles income/expense records and finance queries.
pub struct FinanceExtension {
    meta: ExtensionMetadata,
    storage: Option<Arc<dyn RecordStore>>,
    ai: Option<Arc<dyn LlmBackend>>,
    query: Option<QueryService>,
}

impl FinanceExtension {
    pub fn new(meta: ExtensionMetadata) -> Self {
        Self {
            meta,
            storage: None,
            ai: None,
            query: None,
        }
    }

    fn storage(&self) -> Result<&Arc<dyn RecordStore>> {
        self.storage
            .as_ref()
            .ok_or_else(|| ExtensionError::ExecutionFailed("extension not initialized".into()))
    }

    fn ai(&self) -> Result<&Arc<dyn LlmBackend>> {
        self.ai
            .as_ref()
            .ok_or_else(|| ExtensionError::ExecutionFailed("extension not initialized".into()))
    }

    /// Classify add-vs-query when the router did not pass an action.
    async fn recognize_action(&self, input_text: &str) -> Result<String> {
        let prompt = format!(
            "Decide whether the user wants to add a finance record or query \
             finance data.\n\nUser input: {}\n\n\
             Respond with a single JSON object: {{\"action\": \"add\"}} or \
             {{\"action\": \"query\"}}.\n\
             Adding mentions new spending or income (spent, paid, bought, \
             received salary). Querying asks about existing data (how much, \
             show, total, list).",
            input_text
        );

        let value = self
            .ai()?
            .generate_json(&prompt)
            .await
            .map_err(|e| ExtensionError::ExecutionFailed(e.to_string()))?;

        Ok(value
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("add")
            .to_string())
    }

    async fn add_records(
        &self,
        request: &ChannelRequest,
        user_id: i64,
    ) -> Result<ChannelResponse> {
        let today = Utc::now().format("%Y-%m-%d");
        let prompt = format!(
            "Extract finance records from the user input.\n\n\
             User input: {input}\n\
             Today's date: {today}\n\n\
             Respond with a single JSON object:\n\
             {{\"records\": [{{\"type\": \"income\" or \"expense\", \
             \"amount\": <number>, \"primary_category\": \"...\", \
             \"secondary_category\": \"...\", \"description\": \"...\", \
             \"record_date\": \"YYYY-MM-DD\"}}]}}\n\n\
             Rules: one entry per distinct record in the input; amount is a \
             bare number; record_date defaults to today; words like spent, \
             paid, bought mean expense; salary, received, earned mean income.",
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
                "no finance records recognized in the input",
            ));
        }

        let mut inserted = 0usize;
        let mut total = 0.0f64;
        let mut first_label = String::new();
        let mut first_type = "expense".to_string();

        for record in &records {
            let amount = record.get("amount").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if amount <= 0.0 {
                warn!(user_id, "skipping record with non-positive amount");
                continue;
            }

            let record_type = record
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("expense")
                .to_string();
            let description = record
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let category = record
                .get("primary_category")
                .and_then(|v| v.as_str())
                .unwrap_or("other")
                .to_string();

            let mut fields = JsonMap::new();
            fields.insert("type".into(), json!(record_type.clone()));
            fields.insert("amount".into(), json!(amount));
            fields.insert("primary_category".into(), json!(category.clone()));
            for key in ["secondary_category", "payment_method", "merchant"] {
                if let Some(value) = record.get(key).and_then(|v| v.as_str()) {
                    fields.insert(key.into(), json!(value));
                }
            }
            if !description.is_empty() {
                fields.insert("description".into(), json!(description.clone()));
            }
            if let Some(tags) = record.get("tags").and_then(|v| v.as_array()) {
                fields.insert("tags".into(), json!(tags));
            }
            fields.insert(
                "record_date".into(),
                json!(record
                    .get("record_date")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&today.to_string())),
            );
            fields.insert("raw_text".into(), json!(request.input_text));

            match self.storage()?.insert(COLLECTION, user_id, fields).await {
                Ok(_) => {
                    if inserted == 0 {
                        first_label = if description.is_empty() {
                            category
                        } else {
                            description
                        };
                        first_type = record_type;
                    }
                    inserted += 1;
                    total += amount;
                }
                Err(e) => {
                    warn!(user_id, error = %e, "failed to insert finance record");
                }
            }
        }

        if inserted == 0 {
            return Ok(ChannelResponse::failure("no records could be added"));
        }

        let message = if inserted == 1 {
            format!("Added: {} {:.2} ({})", first_label, total, first_type)
        } else {
            format!("Added {} records totaling {:.2}", inserted, total)
        };

        Ok(ChannelResponse::ok(message)
            .with_data(json!({"count": inserted, "total": total})))
    }

    async fn run_query(
        &self,
        request: &ChannelRequest,
        user_id: i64,
    ) -> Result<ChannelResponse> {
        let prompt = format!(
            "{schema}\n\n\
             User query: {input}\n\
             Current date: {today}\n\n\
             Generate a SQLite SELECT statement answering the query.\n\
             Rules: filter by user_id = {{user_id}}; aggregate amounts with \
             SUM where the question asks for totals; keep LIMIT at or below \
             100; no comments, no other statements.\n\n\
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

        debug!(user_id, sql = %sql, "generated finance query");

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
            return Ok(ChannelResponse::ok("No matching finance records.")
                .with_data(json!({"rows_count": 0})));
        }

        Ok(ChannelResponse::ok(explanation)
            .with_data(json!({"rows_count": rows.len()}))
            .with_metadata("markdown", json!(markdown_table(&rows))))
    }
}

#[async_trait]
impl Extension for FinanceExtension {
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

        let action = match params.get("action").and_then(|v| v.as_str()) {
            Some(action) => action.to_string(),
            None => self.recognize_action(&request.input_text).await?,
        };

        match action.as_str() {
            "add" => self.add_records(request, user_id).await,
            "query" => self.run_query(request, user_id).await,
            other => Ok(ChannelResponse::failure(format!(
                "unknown action: {}",
                other
            ))),
        }
    }
}
