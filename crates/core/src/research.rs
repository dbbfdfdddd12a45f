//! Research request and response types shared by the single-shot and
//! streaming entry points.

use serde::{Deserialize, Serialize};
use crate::message::ChatMessage;
use crate::source::SourceReference;

/// Per-call model overrides supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOverrides {
    /// Model that drives the tool-calling loop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_model: Option<String>,

    /// Model the knowledge service uses for intermediate answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_model: Option<String>,

    /// Model the knowledge service uses for its final synthesis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer_model: Option<String>,
}

impl ModelOverrides {
    pub fn is_empty(&self) -> bool {
        self.strategy_model.is_none()
            && self.answer_model.is_none()
            && self.final_answer_model.is_none()
    }

    /// Fill unset roles from `defaults`.
    pub fn or(self, defaults: &ModelOverrides) -> ModelOverrides {
        ModelOverrides {
            strategy_model: self.strategy_model.or_else(|| defaults.strategy_model.clone()),
            answer_model: self.answer_model.or_else(|| defaults.answer_model.clone()),
            final_answer_model: self
                .final_answer_model
                .or_else(|| defaults.final_answer_model.clone()),
        }
    }
}

/// One research request. Immutable once accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchQuery {
    pub query: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,

    /// Emit tool_start / tool_result events on the stream
    #[serde(default)]
    pub verbose: bool,

    /// Expose the web search capability
    #[serde(default)]
    pub search_web: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_config: Option<ModelOverrides>,
}

impl ResearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_notebook(mut self, notebook_id: impl Into<String>) -> Self {
        self.notebook_id = Some(notebook_id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// The step bound for this request; never below 1.
    pub fn effective_max_steps(&self, default: u32) -> u32 {
        self.max_steps.unwrap_or(default).max(1)
    }

    pub fn overrides(&self) -> ModelOverrides {
        self.model_config.clone().unwrap_or_default()
    }
}

/// A capability invocation as reported to single-shot callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub result: serde_json::Value,
}

/// The single-shot research response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResponse {
    pub response: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceReference>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallSummary>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parses_camel_case_request() {
        let json = r#"{
            "query": "What is photosynthesis?",
            "notebookId": "nb_1",
            "maxSteps": 3,
            "searchWeb": true,
            "history": [{"role": "user", "content": "hi"}],
            "modelConfig": {"strategyModel": "gpt-4o", "finalAnswerModel": "gpt-4o-mini"}
        }"#;
        let q: ResearchQuery = serde_json::from_str(json).unwrap();
        assert_eq!(q.notebook_id.as_deref(), Some("nb_1"));
        assert_eq!(q.max_steps, Some(3));
        assert!(q.search_web);
        assert!(!q.verbose);
        assert_eq!(q.history.len(), 1);
        let overrides = q.overrides();
        assert_eq!(overrides.strategy_model.as_deref(), Some("gpt-4o"));
        assert_eq!(overrides.final_answer_model.as_deref(), Some("gpt-4o-mini"));
        assert!(overrides.answer_model.is_none());
    }

    #[test]
    fn overrides_fill_from_defaults() {
        let request = ModelOverrides {
            strategy_model: Some("gpt-4o".into()),
            ..ModelOverrides::default()
        };
        let defaults = ModelOverrides {
            strategy_model: Some("gpt-4o-mini".into()),
            answer_model: Some("claude".into()),
            final_answer_model: None,
        };
        let merged = request.or(&defaults);
        assert_eq!(merged.strategy_model.as_deref(), Some("gpt-4o"));
        assert_eq!(merged.answer_model.as_deref(), Some("claude"));
        assert!(merged.final_answer_model.is_none());
    }

    #[test]
    fn effective_max_steps_floors_at_one() {
        assert_eq!(ResearchQuery::new("q").effective_max_steps(10), 10);
        assert_eq!(ResearchQuery::new("q").with_max_steps(0).effective_max_steps(10), 1);
        assert_eq!(ResearchQuery::new("q").with_max_steps(3).effective_max_steps(10), 3);
    }

    #[test]
    fn response_omits_empty_fields() {
        let resp = ResearchResponse {
            response: "Plants convert light into chemical energy.".into(),
            sources: None,
            tool_calls: None,
            steps: Some(1),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("sources").is_none());
        assert!(json.get("toolCalls").is_none());
        assert_eq!(json["steps"], 1);
    }
}
