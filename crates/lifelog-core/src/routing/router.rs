//! Request router.
//!
//! Turns one natural-language request into exactly one extension
//! invocation, using an AI call as the sole decision oracle with the user's
//! recent conversation as decision context.
//!
//! Failure semantics: an AI-decision failure or an unresolved extension name
//! short-circuits with no turn recorded. An extension that runs but reports
//! its own failure still gets a turn, so the history reflects what the user
//! experienced. Nothing escapes [`Router::route`] as a raw fault.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, warn};

use crate::context::{ContextStore, ConversationTurn, TurnData};
use crate::error::Error;
use crate::extension::{ExtensionInfo, ExtensionManager, ExtensionState};
use crate::llm::{LlmBackend, LlmError};
use crate::message::{ChannelRequest, ChannelResponse, JsonMap};

/// How many recent turns feed the decision prompt.
pub const ROUTER_CONTEXT_TURNS: usize = 3;

/// Reserved params key carrying the routed action tag into the extension.
pub const ACTION_PARAM: &str = "action";

/// Structured decision produced by the AI call. Consumed once per request,
/// never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingDecision {
    /// Whether the model produced a usable decision.
    #[serde(default)]
    pub success: bool,
    /// Selected extension name.
    #[serde(default)]
    pub extension: Option<String>,
    /// Action tag for the extension.
    #[serde(default)]
    pub action: Option<String>,
    /// Free-form parameters.
    #[serde(default)]
    pub params: JsonMap,
    /// Error text when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

/// AI-driven request router.
pub struct Router {
    manager: Arc<ExtensionManager>,
    contexts: Arc<dyn ContextStore>,
    llm: Arc<dyn LlmBackend>,
    decision_timeout: Option<Duration>,
}

impl Router {
    /// Create a router over the given collaborators.
    pub fn new(
        manager: Arc<ExtensionManager>,
        contexts: Arc<dyn ContextStore>,
        llm: Arc<dyn LlmBackend>,
    ) -> Self {
        Self {
            manager,
            contexts,
            llm,
            decision_timeout: None,
        }
    }

    /// Impose a deadline on the AI decision call. A timeout is treated as a
    /// decision failure.
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = Some(timeout);
        self
    }

    /// Route one request to exactly one extension invocation.
    pub async fn route(&self, request: &ChannelRequest) -> ChannelResponse {
        match self.route_inner(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(user_id = %request.user_id, error = %e, "routing error");
                ChannelResponse::failure(format!("routing failed: {}", e))
            }
        }
    }

    async fn route_inner(&self, request: &ChannelRequest) -> Result<ChannelResponse, Error> {
        let user_id: i64 = request.user_id.parse().map_err(|_| {
            Error::InvalidRequest(format!("user id '{}' is not numeric", request.user_id))
        })?;

        let context = self.contexts.get_context(user_id).await?;
        let recent = self
            .contexts
            .recent_turns(user_id, ROUTER_CONTEXT_TURNS)
            .await?;

        let decision = match self.decide(&request.input_text, &recent).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(user_id, error = %e, "AI decision failed");
                return Ok(ChannelResponse::failure(format!(
                    "routing decision failed: {}",
                    e
                )));
            }
        };

        if !decision.success {
            return Ok(ChannelResponse::failure(
                decision
                    .error
                    .unwrap_or_else(|| "routing decision failed".to_string()),
            ));
        }

        let extension_name = match decision.extension.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                return Ok(ChannelResponse::failure(
                    "routing decision did not name an extension",
                ))
            }
        };

        let handle = match self.manager.get(&extension_name).await {
            Some(handle) => handle,
            None => {
                return Ok(ChannelResponse::failure(format!(
                    "extension not found: {}",
                    extension_name
                )))
            }
        };

        let action = decision.action.unwrap_or_else(|| "add".to_string());
        let mut params = decision.params;
        params.insert(
            ACTION_PARAM.to_string(),
            serde_json::Value::String(action.clone()),
        );

        let state = context.map(|c| c.state).unwrap_or_default();

        // The handle was captured once above; a reload happening now lets
        // this call finish against the pre-reload instance.
        let response = {
            let ext = handle.read().await;
            ext.execute(request, &state, &params).await?
        };

        self.contexts
            .add_turn(
                user_id,
                TurnData {
                    user_input: request.input_text.clone(),
                    intent: Some(action),
                    domain: Some(extension_name),
                    response: response.message.clone(),
                    metadata: response.metadata.clone(),
                },
            )
            .await?;

        Ok(response)
    }

    async fn decide(
        &self,
        input_text: &str,
        recent: &[ConversationTurn],
    ) -> Result<RoutingDecision, LlmError> {
        let active: Vec<ExtensionInfo> = self
            .manager
            .list()
            .await
            .into_iter()
            .filter(|info| info.state == ExtensionState::Active)
            .collect();

        let prompt = build_decision_prompt(input_text, &active, recent);

        let call = self.llm.generate_json(&prompt);
        let value = match self.decision_timeout {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .map_err(|_| LlmError::Timeout)??,
            None => call.await?,
        };

        serde_json::from_value(value).map_err(|e| LlmError::Unparseable(e.to_string()))
    }
}

/// Build the routing decision prompt: raw input, active extensions with
/// their descriptions (already sorted by name), and the recent transcript.
fn build_decision_prompt(
    input_text: &str,
    extensions: &[ExtensionInfo],
    recent: &[ConversationTurn],
) -> String {
    let extension_list = extensions
        .iter()
        .map(|info| format!("- {}: {}", info.name, info.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are the routing layer of a personal data tracking assistant.\n\
         Pick exactly one extension to handle the user's request.\n\n\
         User input: {input}\n\n\
         Available extensions:\n{extensions}\n\n\
         Recent conversation (most recent first):\n{transcript}\n\n\
         Respond with a single JSON object:\n\
         {{\"success\": true, \"extension\": \"<name>\", \"action\": \"add\" or \"query\", \"params\": {{}}}}\n\
         If no extension fits, respond with:\n\
         {{\"success\": false, \"error\": \"<why>\"}}",
        input = input_text,
        extensions = extension_list,
        transcript = format_transcript(recent),
    )
}

fn format_transcript(recent: &[ConversationTurn]) -> String {
    if recent.is_empty() {
        return "(no prior conversation)".to_string();
    }

    let mut lines = Vec::with_capacity(recent.len() * 2);
    for turn in recent {
        lines.push(format!("user: {}", turn.user_input));
        lines.push(format!(
            "system: {} [{}]",
            turn.response,
            turn.domain.as_deref().unwrap_or("unknown")
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextUpdate, ConversationContext, MAX_RETAINED_TURNS};
    use crate::extension::{
        Extension, ExtensionError, ExtensionFactory, ExtensionManifest, ExtensionMetadata,
        MANIFEST_FILE,
    };
    use crate::message::Channel;
    use crate::storage::{RecordStore, StorageError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    // ------------------------------------------------------------------
    // Stub collaborators
    // ------------------------------------------------------------------

    /// In-memory context store.
    struct MemoryContexts {
        turns: Mutex<Vec<ConversationTurn>>,
        next_id: Mutex<i64>,
    }

    impl MemoryContexts {
        fn new() -> Self {
            Self {
                turns: Mutex::new(Vec::new()),
                next_id: Mutex::new(1),
            }
        }

        fn turn_count(&self) -> usize {
            self.turns.lock().len()
        }
    }

    #[async_trait]
    impl ContextStore for MemoryContexts {
        async fn get_context(
            &self,
            _user_id: i64,
        ) -> Result<Option<ConversationContext>, StorageError> {
            Ok(None)
        }

        async fn get_or_create_context(
            &self,
            user_id: i64,
        ) -> Result<ConversationContext, StorageError> {
            Ok(ConversationContext {
                user_id,
                current_intent: None,
                current_domain: None,
                state: JsonMap::new(),
                updated_at: chrono::Utc::now(),
            })
        }

        async fn update_context(
            &self,
            user_id: i64,
            _update: ContextUpdate,
        ) -> Result<ConversationContext, StorageError> {
            self.get_or_create_context(user_id).await
        }

        async fn add_turn(
            &self,
            user_id: i64,
            turn: TurnData,
        ) -> Result<ConversationTurn, StorageError> {
            let mut id = self.next_id.lock();
            let recorded = ConversationTurn {
                id: *id,
                user_id,
                timestamp: chrono::Utc::now(),
                user_input: turn.user_input,
                intent: turn.intent,
                domain: turn.domain,
                response: turn.response,
                metadata: turn.metadata,
            };
            *id += 1;
            let mut turns = self.turns.lock();
            turns.push(recorded.clone());
            let len = turns.len();
            if len > MAX_RETAINED_TURNS {
                turns.drain(..len - MAX_RETAINED_TURNS);
            }
            Ok(recorded)
        }

        async fn recent_turns(
            &self,
            _user_id: i64,
            limit: usize,
        ) -> Result<Vec<ConversationTurn>, StorageError> {
            let turns = self.turns.lock();
            Ok(turns.iter().rev().take(limit).cloned().collect())
        }
    }

    /// Scripted LLM backend: pops queued responses, errors when empty.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<serde_json::Value>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<serde_json::Value>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedLlm {
        async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
            self.generate_json(prompt).await.map(|v| v.to_string())
        }

        async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value, LlmError> {
            self.prompts.lock().push(prompt.to_string());
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| LlmError::Backend("scripted backend exhausted".into()))
        }
    }

    struct NullStore;

    #[async_trait]
    impl RecordStore for NullStore {
        async fn insert(&self, _: &str, _: i64, _: JsonMap) -> Result<i64, StorageError> {
            Ok(1)
        }
        async fn fetch(&self, _: &str, _: i64, _: i64) -> Result<Option<JsonMap>, StorageError> {
            Ok(None)
        }
        async fn update(&self, _: &str, _: i64, _: i64, _: JsonMap) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn delete(&self, _: &str, _: i64, _: i64) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn query_rows(&self, _: &str) -> Result<Vec<JsonMap>, StorageError> {
            Ok(Vec::new())
        }
    }

    /// Echoing extension: succeeds, repeating the input in the message.
    struct EchoExtension {
        meta: ExtensionMetadata,
        fail_domain: bool,
    }

    #[async_trait]
    impl Extension for EchoExtension {
        fn metadata(&self) -> &ExtensionMetadata {
            &self.meta
        }

        async fn initialize(
            &mut self,
            _storage: Arc<dyn RecordStore>,
            _ai: Arc<dyn LlmBackend>,
        ) -> Result<(), ExtensionError> {
            Ok(())
        }

        async fn execute(
            &self,
            request: &ChannelRequest,
            _context: &JsonMap,
            params: &JsonMap,
        ) -> Result<ChannelResponse, ExtensionError> {
            if self.fail_domain {
                return Ok(ChannelResponse::failure("amount could not be parsed"));
            }
            let action = params
                .get(ACTION_PARAM)
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            Ok(ChannelResponse::ok(format!(
                "recorded ({}): {}",
                action, request.input_text
            )))
        }
    }

    struct EchoFactory {
        fail_domain: bool,
    }

    impl ExtensionFactory for EchoFactory {
        fn build(
            &self,
            manifest: &ExtensionManifest,
        ) -> Result<Box<dyn Extension>, ExtensionError> {
            Ok(Box::new(EchoExtension {
                meta: manifest.metadata()?,
                fail_domain: self.fail_domain,
            }))
        }
    }

    // ------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------

    struct Harness {
        _dir: tempfile::TempDir,
        router: Router,
        contexts: Arc<MemoryContexts>,
        llm: Arc<ScriptedLlm>,
    }

    async fn harness(llm: ScriptedLlm, fail_domain: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        for name in ["finance", "work"] {
            let ext_dir = dir.path().join(name);
            std::fs::create_dir_all(&ext_dir).unwrap();
            std::fs::write(
                ext_dir.join(MANIFEST_FILE),
                serde_json::json!({
                    "name": name,
                    "display_name": name,
                    "description": format!("handles {} records", name),
                    "version": "1.0.0",
                    "entry": "echo",
                })
                .to_string(),
            )
            .unwrap();
        }

        let llm = Arc::new(llm);
        let backend: Arc<dyn LlmBackend> = llm.clone();
        let manager = Arc::new(ExtensionManager::new(
            dir.path(),
            Arc::new(NullStore),
            backend.clone(),
        ));
        manager
            .register_factory("echo", Arc::new(EchoFactory { fail_domain }))
            .await;
        assert_eq!(manager.discover_and_load_all().await, 2);

        let contexts = Arc::new(MemoryContexts::new());
        let router = Router::new(manager, contexts.clone(), backend);

        Harness {
            _dir: dir,
            router,
            contexts,
            llm,
        }
    }

    fn decision(extension: &str, action: &str) -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "extension": extension,
            "action": action,
            "params": {}
        })
    }

    // ------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_routes_to_selected_extension() {
        let h = harness(ScriptedLlm::new(vec![decision("finance", "add")]), false).await;
        let request = ChannelRequest::new("1", "today I spent 50 on lunch", Channel::Cli);

        let response = h.router.route(&request).await;

        assert!(response.success);
        assert!(response.message.contains("50"));

        let turns = h.contexts.turns.lock();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].domain.as_deref(), Some("finance"));
        assert_eq!(turns[0].intent.as_deref(), Some("add"));
        assert_eq!(turns[0].user_input, "today I spent 50 on lunch");
    }

    #[tokio::test]
    async fn test_decision_failure_records_no_turn() {
        // Empty script: the decision call errors.
        let h = harness(ScriptedLlm::new(vec![]), false).await;
        let request = ChannelRequest::new("1", "hello", Channel::Cli);

        let before = h.contexts.turn_count();
        let response = h.router.route(&request).await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("routing decision failed"));
        assert_eq!(h.contexts.turn_count(), before);
    }

    #[tokio::test]
    async fn test_unsuccessful_decision_records_no_turn() {
        let h = harness(
            ScriptedLlm::new(vec![serde_json::json!({
                "success": false,
                "error": "could not classify intent"
            })]),
            false,
        )
        .await;
        let request = ChannelRequest::new("1", "???", Channel::Cli);

        let response = h.router.route(&request).await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("could not classify intent"));
        assert_eq!(h.contexts.turn_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_extension_records_no_turn() {
        let h = harness(ScriptedLlm::new(vec![decision("ghost", "add")]), false).await;
        let request = ChannelRequest::new("1", "do something", Channel::Cli);

        let response = h.router.route(&request).await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("ghost"));
        assert_eq!(h.contexts.turn_count(), 0);
    }

    #[tokio::test]
    async fn test_extension_failure_still_records_turn() {
        let h = harness(ScriptedLlm::new(vec![decision("finance", "add")]), true).await;
        let request = ChannelRequest::new("1", "spent fifty maybe", Channel::Cli);

        let response = h.router.route(&request).await;

        // The extension ran and reported its own failure; the user received
        // something, so the history records it.
        assert!(!response.success);
        assert_eq!(h.contexts.turn_count(), 1);
    }

    #[tokio::test]
    async fn test_non_numeric_user_is_generic_failure() {
        let h = harness(ScriptedLlm::new(vec![decision("finance", "add")]), false).await;
        let request = ChannelRequest::new("not-a-number", "hi", Channel::Cli);

        let response = h.router.route(&request).await;

        assert!(!response.success);
        assert_eq!(h.contexts.turn_count(), 0);
    }

    #[tokio::test]
    async fn test_prompt_contains_input_extensions_and_transcript() {
        let h = harness(
            ScriptedLlm::new(vec![decision("finance", "add"), decision("work", "add")]),
            false,
        )
        .await;

        let first = ChannelRequest::new("1", "spent 50 on lunch", Channel::Cli);
        h.router.route(&first).await;

        let second = ChannelRequest::new("1", "worked 4 hours", Channel::Cli);
        h.router.route(&second).await;

        let prompts = h.llm.prompts.lock().clone();

        assert!(prompts[1].contains("worked 4 hours"));
        assert!(prompts[1].contains("finance: handles finance records"));
        assert!(prompts[1].contains("work: handles work records"));
        // The first turn shows up in the second prompt's transcript.
        assert!(prompts[1].contains("user: spent 50 on lunch"));
        assert!(prompts[1].contains("[finance]"));
    }

    #[tokio::test]
    async fn test_timeout_is_decision_failure() {
        /// Backend that never completes.
        struct StallingLlm;

        #[async_trait]
        impl LlmBackend for StallingLlm {
            async fn generate(&self, _: &str) -> Result<String, LlmError> {
                futures::future::pending().await
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let llm: Arc<dyn LlmBackend> = Arc::new(StallingLlm);
        let manager = Arc::new(ExtensionManager::new(
            dir.path(),
            Arc::new(NullStore),
            llm.clone(),
        ));
        let contexts = Arc::new(MemoryContexts::new());
        let router = Router::new(manager, contexts.clone(), llm)
            .with_decision_timeout(Duration::from_millis(20));

        let response = router
            .route(&ChannelRequest::new("1", "hello", Channel::Cli))
            .await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("timed out"));
        assert_eq!(contexts.turn_count(), 0);
    }
}
