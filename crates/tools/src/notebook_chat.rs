//! `notebook_chat`: multi-turn dialogue with one notebook.
//!
//! The knowledge service keeps conversation state per chat session, so the
//! tool reuses one session per notebook until it is older than the TTL.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::knowledge::{ChatSession, KnowledgeService};
use quarry_core::tool::{CapabilityResult, Tool, ToolContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use crate::{required_str, target_notebook};

struct CachedSession {
    session: ChatSession,
    opened_at: Instant,
}

pub struct NotebookChatTool {
    knowledge: Arc<dyn KnowledgeService>,
    ttl: Duration,
    sessions: Mutex<HashMap<String, CachedSession>>,
}

impl NotebookChatTool {
    pub fn new(knowledge: Arc<dyn KnowledgeService>, ttl: Duration) -> Self {
        Self {
            knowledge,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn session_for(&self, notebook_id: &str) -> Result<ChatSession, ToolError> {
        {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(notebook_id) {
                Some(cached) if cached.opened_at.elapsed() < self.ttl => {
                    return Ok(cached.session.clone());
                }
                Some(_) => {
                    sessions.remove(notebook_id);
                }
                None => {}
            }
        }

        // Not held across the network call; a concurrent miss opens a second
        // session and the later insert wins.
        let session = self.knowledge.create_session(notebook_id).await?;
        tracing::debug!(notebook_id = %notebook_id, session_id = %session.id, "Opened notebook chat session");

        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, cached| cached.opened_at.elapsed() < self.ttl);
        sessions.insert(
            notebook_id.to_string(),
            CachedSession {
                session: session.clone(),
                opened_at: Instant::now(),
            },
        );
        Ok(session)
    }

    /// Number of sessions currently cached, expired or not.
    pub async fn cached_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl Tool for NotebookChatTool {
    fn name(&self) -> &str {
        "notebook_chat"
    }

    fn description(&self) -> &str {
        "Hold a conversation with a notebook. Use this for follow-up questions about the notebook in scope; \
         the notebook remembers earlier turns of this chat."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to send to the notebook"
                },
                "notebook_id": {
                    "type": "string",
                    "description": "Notebook to chat with (defaults to the notebook in scope)"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<CapabilityResult, ToolError> {
        let message = required_str(&input, "message")?;
        let notebook_id = target_notebook(&input, ctx)?;

        let session = self.session_for(&notebook_id).await?;
        let messages = self.knowledge.execute_chat(&session.id, message).await?;

        Ok(CapabilityResult::NotebookChat {
            session_id: session.id,
            messages,
        })
    }
}
