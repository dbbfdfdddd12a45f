//! Intent capabilities: the model materializes a draft instead of answering
//! in prose. No collaborator is called; the draft travels back to the
//! caller in the tool-call records.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::tool::{CapabilityResult, IntentDraft, Tool, ToolContext};
use crate::required_str;

fn optional_str(input: &serde_json::Value, key: &str) -> Option<String> {
    input[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub struct DraftArticleTool;

#[async_trait]
impl Tool for DraftArticleTool {
    fn name(&self) -> &str {
        "draft_article"
    }

    fn description(&self) -> &str {
        "Create an article draft when the user asks you to write an article. \
         Research first, then call this with the finished title and body."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "Article headline" },
                "content": { "type": "string", "description": "Article body in Markdown" },
                "tone": { "type": "string", "description": "Optional tone, e.g. 'formal'" }
            },
            "required": ["title", "content"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<CapabilityResult, ToolError> {
        Ok(CapabilityResult::Intent {
            draft: IntentDraft {
                draft_type: "article".into(),
                title: required_str(&input, "title")?.to_string(),
                content: required_str(&input, "content")?.to_string(),
                platform: None,
                tone: optional_str(&input, "tone"),
            },
        })
    }
}

pub struct DraftPostTool;

#[async_trait]
impl Tool for DraftPostTool {
    fn name(&self) -> &str {
        "draft_post"
    }

    fn description(&self) -> &str {
        "Create a social media post draft when the user asks for a post."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Post text" },
                "platform": {
                    "type": "string",
                    "description": "Target platform, e.g. 'linkedin' or 'x'"
                },
                "title": { "type": "string", "description": "Short internal title" },
                "tone": { "type": "string" }
            },
            "required": ["content"]
        })
    }

    async fn execute(
        &self,
        input: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<CapabilityResult, ToolError> {
        let content = required_str(&input, "content")?.to_string();
        let title = optional_str(&input, "title")
            .unwrap_or_else(|| content.chars().take(60).collect::<String>());

        Ok(CapabilityResult::Intent {
            draft: IntentDraft {
                draft_type: "post".into(),
                title,
                content,
                platform: optional_str(&input, "platform"),
                tone: optional_str(&input, "tone"),
            },
        })
    }
}
