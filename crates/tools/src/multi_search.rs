//! `multi_search`: up to five knowledge searches run concurrently.
//!
//! Sub-query failures are reported per query; one failing search does not
//! fail the others.

use async_trait::async_trait;
use futures::future::join_all;
use quarry_core::error::ToolError;
use quarry_core::knowledge::KnowledgeService;
use quarry_core::tool::{CapabilityResult, QueryResults, Tool, ToolContext};
use std::sync::Arc;
use crate::knowledge_search::search_request;

pub const MAX_QUERIES: usize = 5;

pub struct MultiSearchTool {
    knowledge: Arc<dyn KnowledgeService>,
    default_limit: usize,
    default_min_score: f64,
}

impl MultiSearchTool {
    pub fn new(knowledge: Arc<dyn KnowledgeService>, default_limit: usize, default_min_score: f64) -> Self {
        Self {
            knowledge,
            default_limit,
            default_min_score,
        }
    }
}

#[async_trait]
impl Tool for MultiSearchTool {
    fn name(&self) -> &str {
        "multi_search"
    }

    fn description(&self) -> &str {
        "Run several knowledge searches at once. Use this for broad or multi-part questions \
         where different phrasings or sub-topics each need their own search."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "maxItems": MAX_QUERIES,
                    "description": "Search queries to run in parallel"
                },
                "search_type": {
                    "type": "string",
                    "enum": ["vector", "text"],
                    "default": "vector"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum passages per query",
                    "default": self.default_limit
                }
            },
            "required": ["queries"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<CapabilityResult, ToolError> {
        let queries: Vec<String> = input["queries"]
            .as_array()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'queries' argument".into()))?
            .iter()
            .filter_map(|q| q.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();

        if queries.is_empty() {
            return Err(ToolError::InvalidArguments("'queries' must contain at least one query".into()));
        }
        if queries.len() > MAX_QUERIES {
            return Err(ToolError::InvalidArguments(format!(
                "'queries' accepts at most {MAX_QUERIES} queries, got {}",
                queries.len()
            )));
        }

        let requests = queries
            .iter()
            .map(|q| search_request(q, &input, self.default_limit, self.default_min_score))
            .collect::<Result<Vec<_>, _>>()?;

        let outcomes = join_all(requests.into_iter().map(|r| self.knowledge.search(r))).await;

        let searches = queries
            .into_iter()
            .zip(outcomes)
            .map(|(query, outcome)| match outcome {
                Ok(results) => QueryResults {
                    query,
                    results,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(query = %query, error = %e, "Sub-query failed");
                    QueryResults {
                        query,
                        results: vec![],
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        Ok(CapabilityResult::MultiSearch { searches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryKnowledgeService;

    fn service() -> InMemoryKnowledgeService {
        InMemoryKnowledgeService::new()
            .with_document("biology.pdf", "Chlorophyll absorbs red and blue light", 0.9)
            .with_document("ecology.pdf", "Forests store carbon in biomass", 0.7)
    }

    #[tokio::test]
    async fn runs_every_query_in_order() {
        let service = Arc::new(service());
        let tool = MultiSearchTool::new(service.clone(), 10, 0.0);
        let result = tool
            .execute(
                serde_json::json!({"queries": ["chlorophyll", "carbon", "volcano"]}),
                &ToolContext::default(),
            )
            .await
            .unwrap();

        let CapabilityResult::MultiSearch { searches } = result else {
            panic!("expected multi search result");
        };
        let queries: Vec<&str> = searches.iter().map(|s| s.query.as_str()).collect();
        assert_eq!(queries, vec!["chlorophyll", "carbon", "volcano"]);
        assert_eq!(searches[0].results[0].source_name, "biology.pdf");
        assert_eq!(searches[1].results[0].source_name, "ecology.pdf");
        assert!(searches[2].results.is_empty());
        assert_eq!(service.search_count(), 3);
    }

    #[tokio::test]
    async fn rejects_more_than_five_queries() {
        let tool = MultiSearchTool::new(Arc::new(service()), 10, 0.0);
        let result = tool
            .execute(
                serde_json::json!({"queries": ["a", "b", "c", "d", "e", "f"]}),
                &ToolContext::default(),
            )
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn rejects_empty_query_list() {
        let tool = MultiSearchTool::new(Arc::new(service()), 10, 0.0);
        let result = tool
            .execute(serde_json::json!({"queries": ["  "]}), &ToolContext::default())
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn failing_service_is_reported_per_query() {
        let service = service().with_failure(quarry_core::KnowledgeError::Api {
            status_code: 503,
            message: "index rebuilding".into(),
        });
        let tool = MultiSearchTool::new(Arc::new(service), 10, 0.0);
        let result = tool
            .execute(serde_json::json!({"queries": ["a", "b"]}), &ToolContext::default())
            .await
            .unwrap();

        let CapabilityResult::MultiSearch { searches } = result else {
            panic!("expected multi search result");
        };
        assert_eq!(searches.len(), 2);
        assert!(searches.iter().all(|s| s.error.as_deref().is_some_and(|e| e.contains("503"))));
    }
}
