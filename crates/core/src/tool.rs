//! Capability trait — the operations the research model may invoke mid-run.
//!
//! A capability wraps one external collaborator call (knowledge search,
//! notebook chat, web search, ...). Failures never cross the registry
//! boundary: `ToolRegistry::execute` turns every error into
//! `CapabilityResult::Failure` so the model can observe it and adapt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use crate::error::ToolError;
use crate::knowledge::{KnowledgeSearchResult, NotebookChatMessage, WebSearchResult};
use crate::provider::ToolDefinition;
use crate::research::ModelOverrides;

/// Request-scoped data handed to every capability invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub overrides: ModelOverrides,
    pub channel_id: Option<String>,
    pub notebook_id: Option<String>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn with_overrides(mut self, overrides: ModelOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_scope(mut self, channel_id: Option<String>, notebook_id: Option<String>) -> Self {
        self.channel_id = channel_id;
        self.notebook_id = notebook_id;
        self
    }
}

/// Results of one sub-query of a `multi_search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub query: String,

    #[serde(default)]
    pub results: Vec<KnowledgeSearchResult>,

    /// Set when this sub-query failed; the others are unaffected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A draft materialized by an intent capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDraft {
    /// "article" or "post"
    pub draft_type: String,
    pub title: String,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
}

/// The outcome of one capability invocation, one shape per capability.
///
/// Serialized with a `kind` tag; `to_payload` adds the uniform `success`
/// flag the model sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityResult {
    KnowledgeSearch {
        query: String,
        results: Vec<KnowledgeSearchResult>,
    },
    MultiSearch {
        searches: Vec<QueryResults>,
    },
    KnowledgeAsk {
        question: String,
        answer: String,
    },
    NotebookChat {
        session_id: String,
        messages: Vec<NotebookChatMessage>,
    },
    NotebookContext {
        notebook_id: String,
        context: String,
        source_count: usize,
    },
    WebSearch {
        query: String,
        results: Vec<WebSearchResult>,
    },
    Intent {
        draft: IntentDraft,
    },
    Failure {
        error: String,
    },
}

impl CapabilityResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure { error: error.into() }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    /// The JSON object returned to the model: `{success: true, ...}` or
    /// `{success: false, error}`.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self)
            .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));
        if let Some(obj) = value.as_object_mut() {
            obj.remove("kind");
            obj.insert("success".into(), serde_json::Value::Bool(self.is_success()));
        }
        value
    }
}

/// One capability invocation as recorded by the agent loop. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// The model's tool-call id
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub result: CapabilityResult,
}

/// The core capability trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this capability (e.g., "search_knowledge").
    fn name(&self) -> &str;

    /// A description of when to use this capability (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this capability's input.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the capability.
    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<CapabilityResult, ToolError>;

    /// Convert this capability into a ToolDefinition for the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available capabilities.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a capability. Replaces any existing one with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All capability definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a capability. Never fails: unknown names, bad input,
    /// collaborator errors and cancellation all become `Failure`.
    pub async fn execute(&self, name: &str, input: serde_json::Value, ctx: &ToolContext) -> CapabilityResult {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!(tool = %name, "Model requested unknown capability");
            return CapabilityResult::failure(ToolError::NotFound(name.to_string()).to_string());
        };

        let start = Instant::now();
        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled(name.to_string())),
            r = tool.execute(input, ctx) => r,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                tracing::debug!(tool = %name, elapsed_ms, success = result.is_success(), "Capability executed");
                result
            }
            Err(e) => {
                tracing::warn!(tool = %name, elapsed_ms, error = %e, "Capability failed");
                CapabilityResult::failure(e.to_string())
            }
        }
    }

    /// List all registered capability names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KnowledgeError;

    /// Answers with the question it was given.
    struct EchoAsk;

    #[async_trait]
    impl Tool for EchoAsk {
        fn name(&self) -> &str { "ask_knowledge" }
        fn description(&self) -> &str { "Echoes back the question" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "question": { "type": "string" } },
                "required": ["question"]
            })
        }
        async fn execute(
            &self,
            input: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<CapabilityResult, ToolError> {
            let question = input["question"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("missing 'question'".into()))?;
            Ok(CapabilityResult::KnowledgeAsk {
                question: question.into(),
                answer: format!("echo: {question}"),
            })
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Tool for Unreachable {
        fn name(&self) -> &str { "search_knowledge" }
        fn description(&self) -> &str { "Always fails" }
        fn parameters_schema(&self) -> serde_json::Value { serde_json::json!({"type": "object"}) }
        async fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<CapabilityResult, ToolError> {
            Err(KnowledgeError::Network("connection refused".into()).into())
        }
    }

    struct Stalls;

    #[async_trait]
    impl Tool for Stalls {
        fn name(&self) -> &str { "notebook_context" }
        fn description(&self) -> &str { "Never returns" }
        fn parameters_schema(&self) -> serde_json::Value { serde_json::json!({"type": "object"}) }
        async fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<CapabilityResult, ToolError> {
            std::future::pending().await
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoAsk));
        registry.register(Box::new(Unreachable));
        registry.register(Box::new(Stalls));
        registry
    }

    #[test]
    fn definitions_are_sorted() {
        let defs = registry().definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ask_knowledge", "notebook_context", "search_knowledge"]);
    }

    #[tokio::test]
    async fn execute_success() {
        let result = registry()
            .execute("ask_knowledge", serde_json::json!({"question": "why?"}), &ToolContext::default())
            .await;
        assert_eq!(
            result,
            CapabilityResult::KnowledgeAsk { question: "why?".into(), answer: "echo: why?".into() }
        );
    }

    #[tokio::test]
    async fn unknown_capability_becomes_failure() {
        let result = registry()
            .execute("delete_everything", serde_json::json!({}), &ToolContext::default())
            .await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn invalid_arguments_become_failure() {
        let result = registry()
            .execute("ask_knowledge", serde_json::json!({}), &ToolContext::default())
            .await;
        match result {
            CapabilityResult::Failure { error } => assert!(error.contains("question")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn collaborator_error_becomes_failure_payload() {
        let result = registry()
            .execute("search_knowledge", serde_json::json!({"query": "x"}), &ToolContext::default())
            .await;
        let payload = result.to_payload();
        assert_eq!(payload["success"], false);
        assert!(payload["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_capability() {
        let ctx = ToolContext::default();
        ctx.cancel.cancel();
        let result = registry().execute("notebook_context", serde_json::json!({}), &ctx).await;
        match result {
            CapabilityResult::Failure { error } => assert!(error.contains("cancelled")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn success_payload_is_flat() {
        let payload = CapabilityResult::KnowledgeAsk {
            question: "q".into(),
            answer: "a".into(),
        }
        .to_payload();
        assert_eq!(payload["success"], true);
        assert_eq!(payload["answer"], "a");
        assert!(payload.get("kind").is_none());
    }
}
