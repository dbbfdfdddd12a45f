//! HTTP client for the knowledge retrieval service.
//!
//! Endpoints (all `POST`, JSON in and out, relative to `api_url`):
//! - `/api/search` → `{results: [...]}`
//! - `/api/ask` → `{answer}`
//! - `/api/chat/sessions` → `{id}`
//! - `/api/chat/execute` → `{messages: [...]}`
//! - `/api/context` → `{context, source_count?, token_count?}`

use async_trait::async_trait;
use quarry_core::error::KnowledgeError;
use quarry_core::knowledge::*;
use quarry_core::research::ModelOverrides;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub struct HttpKnowledgeService {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpKnowledgeService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    /// `None` when no service URL is configured.
    pub fn from_config(config: &quarry_config::KnowledgeConfig) -> Option<Self> {
        let url = config.api_url.as_deref()?;
        Some(Self::new(
            url,
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, KnowledgeError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Knowledge service request");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KnowledgeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::Api {
                status_code: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| KnowledgeError::InvalidPayload(format!("{path}: {e}")))
    }
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SearchBody<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    search_type: SearchType,
    limit: usize,
    minimum_score: f64,
}

#[derive(Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Vec<WireResult>,
}

#[derive(Deserialize)]
struct WireResult {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(alias = "title", alias = "source", default)]
    source_name: String,
    #[serde(default)]
    content: String,
    #[serde(alias = "similarity", alias = "relevance", default)]
    score: f64,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl From<WireResult> for KnowledgeSearchResult {
    fn from(w: WireResult) -> Self {
        let id = match w.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self {
            id,
            source_name: w.source_name,
            content: w.content,
            score: w.score,
            metadata: w.metadata,
        }
    }
}

#[derive(Serialize)]
struct AskBody<'a> {
    question: &'a str,
    #[serde(flatten)]
    overrides: &'a ModelOverrides,
}

#[derive(Serialize)]
struct SessionBody<'a> {
    notebook_id: &'a str,
}

#[derive(Deserialize)]
struct SessionReply {
    #[serde(alias = "session_id")]
    id: String,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    session_id: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    messages: Vec<WireChatMessage>,
}

#[derive(Deserialize)]
struct WireChatMessage {
    #[serde(alias = "type")]
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ContextBody<'a> {
    notebook_id: &'a str,
}

#[async_trait]
impl KnowledgeService for HttpKnowledgeService {
    async fn search(&self, request: SearchRequest) -> Result<Vec<KnowledgeSearchResult>, KnowledgeError> {
        let reply: SearchReply = self
            .post(
                "/api/search",
                &SearchBody {
                    query: &request.query,
                    search_type: request.search_type,
                    limit: request.limit,
                    minimum_score: request.min_score,
                },
            )
            .await?;
        Ok(reply.results.into_iter().map(Into::into).collect())
    }

    async fn ask(&self, question: &str, overrides: &ModelOverrides) -> Result<KnowledgeAnswer, KnowledgeError> {
        self.post("/api/ask", &AskBody { question, overrides }).await
    }

    async fn create_session(&self, notebook_id: &str) -> Result<ChatSession, KnowledgeError> {
        let reply: SessionReply = self.post("/api/chat/sessions", &SessionBody { notebook_id }).await?;
        Ok(ChatSession {
            id: reply.id,
            notebook_id: notebook_id.to_string(),
        })
    }

    async fn execute_chat(&self, session_id: &str, message: &str) -> Result<Vec<NotebookChatMessage>, KnowledgeError> {
        let reply: ChatReply = self
            .post("/api/chat/execute", &ChatBody { session_id, message })
            .await?;
        Ok(reply
            .messages
            .into_iter()
            .map(|m| NotebookChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect())
    }

    async fn build_context(&self, notebook_id: &str) -> Result<NotebookContext, KnowledgeError> {
        self.post("/api/context", &ContextBody { notebook_id }).await
    }
}
