//! Research stream events.
//!
//! `ResearchEvent` is the wire protocol of a streamed research run, one JSON
//! object per line:
//! - `status`      — run accepted
//! - `tool_start`  — a capability was invoked (verbose only)
//! - `tool_result` — its result (verbose only)
//! - `delta`       — text the model produced in a step
//! - `sources`     — deduplicated, ranked source references
//! - `done`        — final answer (terminal)
//! - `error`       — the run failed (terminal)

use quarry_core::source::SourceReference;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ResearchEvent {
    Status { status: String },

    ToolStart {
        tool: String,
        tool_input: serde_json::Value,
        status: String,
    },

    ToolResult {
        tool: String,
        tool_input: serde_json::Value,
        tool_result: serde_json::Value,
    },

    Delta { content: String },

    Sources { sources: Vec<SourceReference> },

    Done {
        response: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sources: Option<Vec<SourceReference>>,
        steps: u32,
    },

    Error { error: String },
}

impl ResearchEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::Delta { .. } => "delta",
            Self::Sources { .. } => "sources",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// `done` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// One NDJSON line, newline included.
    pub fn to_ndjson(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "error": e.to_string() }).to_string()
        });
        line.push('\n');
        line
    }
}
