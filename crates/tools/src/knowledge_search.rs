//! `search_knowledge`: text or vector search over the knowledge service.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::knowledge::{KnowledgeService, SearchRequest, SearchType};
use quarry_core::tool::{CapabilityResult, Tool, ToolContext};
use std::sync::Arc;
use crate::required_str;

pub struct KnowledgeSearchTool {
    knowledge: Arc<dyn KnowledgeService>,
    default_limit: usize,
    default_min_score: f64,
}

impl KnowledgeSearchTool {
    pub fn new(knowledge: Arc<dyn KnowledgeService>, default_limit: usize, default_min_score: f64) -> Self {
        Self {
            knowledge,
            default_limit,
            default_min_score,
        }
    }
}

/// Build a search request from model-supplied arguments.
pub(crate) fn search_request(
    query: &str,
    input: &serde_json::Value,
    default_limit: usize,
    default_min_score: f64,
) -> Result<SearchRequest, ToolError> {
    let search_type = match input["search_type"].as_str() {
        None => SearchType::default(),
        Some("vector") => SearchType::Vector,
        Some("text") => SearchType::Text,
        Some(other) => {
            return Err(ToolError::InvalidArguments(format!(
                "Invalid search_type: {other}. Must be 'text' or 'vector'."
            )));
        }
    };

    Ok(SearchRequest {
        query: query.to_string(),
        search_type,
        limit: input["limit"]
            .as_u64()
            .map(|n| n.clamp(1, 50) as usize)
            .unwrap_or(default_limit),
        min_score: input["min_score"]
            .as_f64()
            .map(|s| s.clamp(0.0, 1.0))
            .unwrap_or(default_min_score),
    })
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "search_knowledge"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for passages relevant to a query. Use this first for any factual question. \
         Returns matching passages with their source name, relevance score and location metadata."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "search_type": {
                    "type": "string",
                    "enum": ["vector", "text"],
                    "description": "'vector' for semantic similarity (default), 'text' for exact keywords",
                    "default": "vector"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of passages to return",
                    "default": self.default_limit
                },
                "min_score": {
                    "type": "number",
                    "description": "Minimum relevance score (0.0-1.0)",
                    "default": self.default_min_score
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<CapabilityResult, ToolError> {
        let query = required_str(&input, "query")?;
        let request = search_request(query, &input, self.default_limit, self.default_min_score)?;

        let results = self.knowledge.search(request).await?;
        tracing::debug!(query = %query, hits = results.len(), "Knowledge search complete");

        Ok(CapabilityResult::KnowledgeSearch {
            query: query.to_string(),
            results,
        })
    }
}
