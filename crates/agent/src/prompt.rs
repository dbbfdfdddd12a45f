//! System prompt and message assembly for a research run.

use quarry_core::message::Message;
use quarry_core::provider::ToolDefinition;
use quarry_core::research::ResearchQuery;
use std::fmt::Write;

/// Prior conversation messages included by default.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

const ROLE: &str = "You are a research assistant answering questions from a curated knowledge base. \
Ground every claim in what the capabilities return; if the knowledge base has nothing relevant, say so \
instead of guessing.";

const STRATEGY: &str = "\
## Retrieval strategy
1. Start with `search_knowledge` to find relevant passages.
2. For broad or multi-part questions, use `multi_search` with several focused queries.
3. Use `ask_knowledge` when passages must be synthesized into one explanation.
4. Use `notebook_chat` for follow-up dialogue about the notebook in scope.
5. Use `notebook_context` for questions about a notebook as a whole (summaries, overviews).
6. Stop calling capabilities once you can answer; do not repeat an identical search.";

const CITATIONS: &str = "\
## Citations
Cite every source you rely on inline, right after the claim, using exactly this format:
[[ref:id=<ID>|name=<NAME>|loc=<TYPE>:<VALUE>]]
- ID is the result's `id`; for results without one, use a short slug of the name.
- NAME is the source name as returned.
- loc is optional; TYPE is one of line, page, paragraph, chapter, section, timecode, anchor, index.
- Escape `|`, `]` and `\\` inside values with a backslash.";

/// Build the system prompt for a run scoped to `query` with `tools` available.
pub fn system_prompt(query: &ResearchQuery, tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from(ROLE);
    prompt.push_str("\n\n");
    prompt.push_str(STRATEGY);

    if query.channel_id.is_some() || query.notebook_id.is_some() {
        prompt.push_str("\n\n## Scope\n");
        if let Some(channel) = &query.channel_id {
            let _ = writeln!(prompt, "- Channel: {channel}");
        }
        if let Some(notebook) = &query.notebook_id {
            let _ = writeln!(
                prompt,
                "- Notebook: {notebook} (notebook capabilities default to it)"
            );
        }
    }

    if !tools.is_empty() {
        prompt.push_str("\n\n## Available capabilities\n");
        for tool in tools {
            let _ = writeln!(prompt, "- `{}`: {}", tool.name, tool.description);
        }
    }

    prompt.push_str("\n\n");
    prompt.push_str(CITATIONS);
    prompt
}

/// The full message list for the first model call: system prompt, the last
/// `history_window` history messages, then the query.
pub fn build_messages(query: &ResearchQuery, tools: &[ToolDefinition], history_window: usize) -> Vec<Message> {
    let skip = query.history.len().saturating_sub(history_window);
    let mut messages = Vec::with_capacity(2 + query.history.len() - skip);
    messages.push(Message::system(system_prompt(query, tools)));
    messages.extend(query.history.iter().skip(skip).map(|m| m.to_message()));
    messages.push(Message::user(&query.query));
    messages
}
