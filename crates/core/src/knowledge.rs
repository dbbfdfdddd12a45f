//! Knowledge collaborator traits — the retrieval backends the agent consumes.
//!
//! The knowledge base itself (indexing, embeddings, chat sessions) lives in
//! an external service. These traits describe only the calls the research
//! capabilities make against it:
//! - `search` — text or vector search over indexed sources
//! - `ask` — a synthesized answer from the service's own RAG pipeline
//! - `create_session` / `execute_chat` — multi-turn notebook chat
//! - `build_context` — the full context of one notebook
//!
//! Web search is a separate, optional collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::KnowledgeError;
use crate::research::ModelOverrides;

/// How the knowledge service should match the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Full-text keyword search
    Text,
    /// Embedding similarity search
    #[default]
    Vector,
}

/// A search against the knowledge service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,

    #[serde(default)]
    pub search_type: SearchType,

    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default)]
    pub min_score: f64,
}

fn default_limit() -> usize {
    10
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            search_type: SearchType::default(),
            limit: default_limit(),
            min_score: 0.0,
        }
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSearchResult {
    /// Stable id of the source chunk, when the service provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Title or file name of the source
    pub source_name: String,

    /// The matched content
    pub content: String,

    /// Relevance in [0, 1]
    #[serde(default)]
    pub score: f64,

    /// Free-form metadata (page, timecode, chunk index, source type, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A synthesized answer from the knowledge service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeAnswer {
    pub answer: String,
}

/// A chat session handle on the knowledge service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub notebook_id: String,
}

/// One message of a notebook chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookChatMessage {
    pub role: String,
    pub content: String,
}

/// The full retrievable context of one notebook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookContext {
    pub context: String,

    #[serde(default)]
    pub source_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

/// The knowledge retrieval service.
#[async_trait]
pub trait KnowledgeService: Send + Sync {
    /// Search indexed sources.
    async fn search(
        &self,
        request: SearchRequest,
    ) -> std::result::Result<Vec<KnowledgeSearchResult>, KnowledgeError>;

    /// Ask a question and get a synthesized answer.
    async fn ask(
        &self,
        question: &str,
        overrides: &ModelOverrides,
    ) -> std::result::Result<KnowledgeAnswer, KnowledgeError>;

    /// Open a chat session bound to a notebook.
    async fn create_session(&self, notebook_id: &str) -> std::result::Result<ChatSession, KnowledgeError>;

    /// Send one message in a chat session; returns the session's messages.
    async fn execute_chat(
        &self,
        session_id: &str,
        message: &str,
    ) -> std::result::Result<Vec<NotebookChatMessage>, KnowledgeError>;

    /// Build the full context of a notebook.
    async fn build_context(&self, notebook_id: &str) -> std::result::Result<NotebookContext, KnowledgeError>;
}

/// One web search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// An optional web search collaborator.
#[async_trait]
pub trait WebSearchService: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<WebSearchResult>, KnowledgeError>;
}
