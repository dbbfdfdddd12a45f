//! `notebook_context`: the full assembled context of one notebook.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::knowledge::KnowledgeService;
use quarry_core::tool::{CapabilityResult, Tool, ToolContext};
use std::sync::Arc;
use crate::target_notebook;

pub struct NotebookContextTool {
    knowledge: Arc<dyn KnowledgeService>,
}

impl NotebookContextTool {
    pub fn new(knowledge: Arc<dyn KnowledgeService>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for NotebookContextTool {
    fn name(&self) -> &str {
        "notebook_context"
    }

    fn description(&self) -> &str {
        "Load the complete content of a notebook. Use this for questions about the notebook as a whole \
         (summaries, overviews, comparisons across all its sources)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "notebook_id": {
                    "type": "string",
                    "description": "Notebook to load (defaults to the notebook in scope)"
                }
            }
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<CapabilityResult, ToolError> {
        let notebook_id = target_notebook(&input, ctx)?;
        let context = self.knowledge.build_context(&notebook_id).await?;

        tracing::debug!(
            notebook_id = %notebook_id,
            sources = context.source_count,
            tokens = ?context.token_count,
            "Notebook context loaded"
        );

        Ok(CapabilityResult::NotebookContext {
            notebook_id,
            context: context.context,
            source_count: context.source_count,
        })
    }
}
