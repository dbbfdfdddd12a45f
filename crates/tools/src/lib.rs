//! Research capabilities for Quarry.
//!
//! Capabilities give the research model access to the knowledge service:
//! search it, ask it for a synthesized answer, chat with a notebook, pull a
//! notebook's full context, fan a search out over several queries, and
//! (optionally) search the web or materialize a draft.
//!
//! The HTTP adapters in `http_knowledge` and `http_web_search` implement the
//! collaborator traits from `quarry_core::knowledge`; `InMemoryKnowledgeService`
//! is a fixture-backed implementation for tests and offline runs.

pub mod http_knowledge;
pub mod http_web_search;
pub mod in_memory;
pub mod intent;
pub mod knowledge_ask;
pub mod knowledge_search;
pub mod multi_search;
pub mod notebook_chat;
pub mod notebook_context;
pub mod web_search;

use std::sync::Arc;
use std::time::Duration;
use quarry_core::error::ToolError;
use quarry_core::knowledge::{KnowledgeService, WebSearchService};
use quarry_core::tool::{ToolContext, ToolRegistry};

pub use http_knowledge::HttpKnowledgeService;
pub use http_web_search::HttpWebSearchService;
pub use in_memory::InMemoryKnowledgeService;

/// Which optional capabilities a research run exposes.
#[derive(Debug, Clone)]
pub struct ToolsetOptions {
    /// Expose `web_search` (only honoured when a web service is supplied)
    pub search_web: bool,

    /// Expose `draft_article` and `draft_post`
    pub intent_tools: bool,

    /// Default result count for `search_knowledge`
    pub search_limit: usize,

    /// Default score floor for `search_knowledge`
    pub min_score: f64,

    /// Default result count for `web_search`
    pub web_max_results: usize,

    /// How long a notebook chat session is reused
    pub session_ttl: Duration,
}

impl Default for ToolsetOptions {
    fn default() -> Self {
        Self {
            search_web: false,
            intent_tools: false,
            search_limit: 10,
            min_score: 0.0,
            web_max_results: 5,
            session_ttl: Duration::from_secs(1800),
        }
    }
}

impl ToolsetOptions {
    pub fn from_config(config: &quarry_config::AppConfig) -> Self {
        Self {
            search_web: false,
            intent_tools: config.research.intent_tools,
            search_limit: config.knowledge.search_limit,
            min_score: config.knowledge.min_score,
            web_max_results: config.web_search.max_results,
            session_ttl: Duration::from_secs(config.knowledge.session_ttl_secs),
        }
    }

    pub fn with_search_web(mut self, enabled: bool) -> Self {
        self.search_web = enabled;
        self
    }
}

/// Build the capability set for one research run.
///
/// `notebook_chat` keeps its session cache inside the tool, so callers that
/// want sessions reused across runs should build the registry once per
/// option set and share it.
pub fn research_registry(
    knowledge: Arc<dyn KnowledgeService>,
    web: Option<Arc<dyn WebSearchService>>,
    options: &ToolsetOptions,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(knowledge_search::KnowledgeSearchTool::new(
        knowledge.clone(),
        options.search_limit,
        options.min_score,
    )));
    registry.register(Box::new(multi_search::MultiSearchTool::new(
        knowledge.clone(),
        options.search_limit,
        options.min_score,
    )));
    registry.register(Box::new(knowledge_ask::KnowledgeAskTool::new(knowledge.clone())));
    registry.register(Box::new(notebook_chat::NotebookChatTool::new(
        knowledge.clone(),
        options.session_ttl,
    )));
    registry.register(Box::new(notebook_context::NotebookContextTool::new(knowledge)));

    if options.search_web {
        match web {
            Some(web) => registry.register(Box::new(web_search::WebSearchTool::new(
                web,
                options.web_max_results,
            ))),
            None => tracing::debug!("Web search requested but no web search service is configured"),
        }
    }

    if options.intent_tools {
        registry.register(Box::new(intent::DraftArticleTool));
        registry.register(Box::new(intent::DraftPostTool));
    }

    registry
}

/// A required, non-blank string argument.
pub(crate) fn required_str<'a>(input: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    input[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// The notebook a call targets: the explicit argument, else the request scope.
pub(crate) fn target_notebook(input: &serde_json::Value, ctx: &ToolContext) -> Result<String, ToolError> {
    input["notebook_id"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| ctx.notebook_id.clone())
        .ok_or_else(|| {
            ToolError::InvalidArguments("No notebook in scope; pass 'notebook_id'".into())
        })
}
