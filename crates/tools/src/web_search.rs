//! `web_search`: public web results through the optional web search service.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::knowledge::WebSearchService;
use quarry_core::tool::{CapabilityResult, Tool, ToolContext};
use std::sync::Arc;
use crate::required_str;

pub struct WebSearchTool {
    web: Arc<dyn WebSearchService>,
    default_max_results: usize,
}

impl WebSearchTool {
    pub fn new(web: Arc<dyn WebSearchService>, default_max_results: usize) -> Self {
        Self {
            web,
            default_max_results,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the public web. Use only when the knowledge base has nothing relevant \
         or the question is about recent events."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results to return",
                    "default": self.default_max_results
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
        let max_results = input["max_results"]
            .as_u64()
            .map(|n| n.clamp(1, 20) as usize)
            .unwrap_or(self.default_max_results);

        let results = self.web.search(query, max_results).await?;

        Ok(CapabilityResult::WebSearch {
            query: query.to_string(),
            results,
        })
    }
}
