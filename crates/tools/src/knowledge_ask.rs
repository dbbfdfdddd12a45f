//! `ask_knowledge`: a synthesized answer from the knowledge service's own
//! retrieval pipeline. The request's model overrides travel in the
//! `ToolContext`, never in shared state.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::knowledge::KnowledgeService;
use quarry_core::tool::{CapabilityResult, Tool, ToolContext};
use std::sync::Arc;
use crate::required_str;

pub struct KnowledgeAskTool {
    knowledge: Arc<dyn KnowledgeService>,
}

impl KnowledgeAskTool {
    pub fn new(knowledge: Arc<dyn KnowledgeService>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Tool for KnowledgeAskTool {
    fn name(&self) -> &str {
        "ask_knowledge"
    }

    fn description(&self) -> &str {
        "Ask the knowledge base a question and get a synthesized answer drawn from all indexed sources. \
         Use this when search results need to be combined into one explanation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "A complete, self-contained question"
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<CapabilityResult, ToolError> {
        let question = required_str(&input, "question")?;
        let answer = self.knowledge.ask(question, &ctx.overrides).await?;

        Ok(CapabilityResult::KnowledgeAsk {
            question: question.to_string(),
            answer: answer.answer,
        })
    }
}
