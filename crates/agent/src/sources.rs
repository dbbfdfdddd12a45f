//! Source extraction: turn a run's capability records into a deduplicated,
//! score-ranked list of citable references.

use quarry_core::knowledge::{KnowledgeSearchResult, WebSearchResult};
use quarry_core::source::{LocationType, SourceLocation, SourceReference, SourceType};
use quarry_core::tool::{CapabilityResult, ToolCallRecord};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Characters of content that feed a synthesized id.
const ID_PREFIX_CHARS: usize = 50;

/// Maximum excerpt length, in characters.
pub const EXCERPT_CHARS: usize = 300;

const ANSWER_SOURCE_NAME: &str = "Knowledge base answer";

/// Extract references from every record, in record order, then dedup by id
/// (first occurrence wins) and stable-sort by score descending.
pub fn extract_sources(records: &[ToolCallRecord]) -> Vec<SourceReference> {
    let mut sources = Vec::new();

    for record in records {
        match &record.result {
            CapabilityResult::KnowledgeSearch { results, .. } => {
                sources.extend(results.iter().map(from_search_result));
            }
            CapabilityResult::MultiSearch { searches } => {
                sources.extend(
                    searches
                        .iter()
                        .flat_map(|s| s.results.iter())
                        .map(from_search_result),
                );
            }
            CapabilityResult::KnowledgeAsk { question, answer } => {
                let mut reference = SourceReference::new(
                    synthesize_id(ANSWER_SOURCE_NAME, question),
                    ANSWER_SOURCE_NAME,
                    excerpt(answer),
                    1.0,
                );
                reference.used_in_response = Some(true);
                sources.push(reference);
            }
            CapabilityResult::WebSearch { results, .. } => {
                sources.extend(results.iter().map(from_web_result));
            }
            CapabilityResult::NotebookChat { .. }
            | CapabilityResult::NotebookContext { .. }
            | CapabilityResult::Intent { .. }
            | CapabilityResult::Failure { .. } => {}
        }
    }

    let mut seen = HashSet::new();
    sources.retain(|s| seen.insert(s.id.clone()));
    sources.sort_by(|a, b| b.score.total_cmp(&a.score));
    sources
}

fn from_search_result(result: &KnowledgeSearchResult) -> SourceReference {
    let id = result
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| synthesize_id(&result.source_name, &result.content));

    let mut reference = SourceReference::new(id, &result.source_name, excerpt(&result.content), result.score);
    reference.location = recover_location(&result.metadata);
    reference.source_type = infer_source_type(&result.source_name, &result.metadata);
    reference
}

fn from_web_result(result: &WebSearchResult) -> SourceReference {
    let name = if result.title.trim().is_empty() {
        result.url.clone()
    } else {
        result.title.clone()
    };
    SourceReference::new(&result.url, name, excerpt(&result.content), result.score.unwrap_or(0.0))
        .with_source_type(SourceType::Website)
}

/// A stable id for a result the service did not identify.
pub fn synthesize_id(source_name: &str, content: &str) -> String {
    let prefix: String = content.chars().take(ID_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(source_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(prefix.as_bytes());
    let digest = hasher.finalize();
    format!("src_{}", hex::encode(&digest[..6]))
}

fn excerpt(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    out.push_str("...");
    out
}

/// Metadata keys probed for a location, highest priority first.
const LOCATION_KEYS: &[(LocationType, &[&str])] = &[
    (LocationType::Timecode, &["timecode", "timestamp"]),
    (LocationType::Page, &["page", "page_number"]),
    (LocationType::Chapter, &["chapter"]),
    (LocationType::Section, &["section"]),
    (LocationType::Line, &["line", "line_number"]),
    (LocationType::Index, &["chunk_index", "index"]),
];

/// The highest-priority location present in result metadata.
pub fn recover_location(metadata: &Map<String, Value>) -> Option<SourceLocation> {
    LOCATION_KEYS.iter().find_map(|(kind, keys)| {
        keys.iter()
            .find_map(|key| metadata.get(*key).and_then(|v| location_value(*kind, v)))
            .map(|value| {
                let label = location_label(*kind, &value);
                SourceLocation::new(*kind, value).with_label(label)
            })
    })
}

fn location_value(kind: LocationType, value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => {
            let n = n.as_f64()?;
            if kind == LocationType::Timecode {
                Some(format_timecode(n))
            } else if n.fract() == 0.0 {
                Some(format!("{}", n as i64))
            } else {
                Some(n.to_string())
            }
        }
        _ => None,
    }
}

/// Seconds as `MM:SS`, or `HH:MM:SS` past the hour.
fn format_timecode(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

fn location_label(kind: LocationType, value: &str) -> String {
    match kind {
        LocationType::Timecode => value.to_string(),
        LocationType::Page => format!("Page {value}"),
        LocationType::Chapter => format!("Chapter {value}"),
        LocationType::Section => format!("Section {value}"),
        LocationType::Line => format!("Line {value}"),
        LocationType::Paragraph => format!("Paragraph {value}"),
        LocationType::Index => format!("Chunk {value}"),
        LocationType::Anchor => format!("#{value}"),
    }
}

/// Explicit metadata first, then the shape of the source name.
pub fn infer_source_type(name: &str, metadata: &Map<String, Value>) -> Option<SourceType> {
    let explicit = ["source_type", "type"]
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(Value::as_str))
        .find_map(SourceType::parse);
    if explicit.is_some() {
        return explicit;
    }

    let lower = name.trim().to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.") {
        if lower.contains("youtube.com") || lower.contains("youtu.be") || lower.contains("vimeo.com") {
            return Some(SourceType::Video);
        }
        return Some(SourceType::Website);
    }

    let extension = lower.rsplit_once('.').map(|(_, ext)| ext)?;
    match extension {
        "pdf" => Some(SourceType::Pdf),
        "mp3" | "wav" | "m4a" | "ogg" | "flac" | "aac" => Some(SourceType::Audio),
        "mp4" | "mov" | "webm" | "mkv" | "avi" => Some(SourceType::Video),
        "doc" | "docx" | "odt" | "rtf" | "pptx" => Some(SourceType::Document),
        "txt" | "md" | "markdown" => Some(SourceType::Text),
        "html" | "htm" => Some(SourceType::Website),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::tool::QueryResults;

    fn hit(id: Option<&str>, name: &str, content: &str, score: f64, metadata: Value) -> KnowledgeSearchResult {
        KnowledgeSearchResult {
            id: id.map(String::from),
            source_name: name.into(),
            content: content.into(),
            score,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    fn search_record(results: Vec<KnowledgeSearchResult>) -> ToolCallRecord {
        ToolCallRecord {
            id: "call_1".into(),
            name: "search_knowledge".into(),
            input: serde_json::json!({"query": "q"}),
            result: CapabilityResult::KnowledgeSearch {
                query: "q".into(),
                results,
            },
        }
    }

    #[test]
    fn dedups_by_derived_id_and_sorts_by_score() {
        let results = vec![
            hit(None, "bio.pdf", "Chlorophyll absorbs light", 0.6, Value::Null),
            hit(Some("k2"), "soil.md", "Soil stores carbon", 0.9, Value::Null),
        ];
        // The same search run twice yields the same synthesized ids.
        let records = vec![search_record(results.clone()), search_record(results)];

        let sources = extract_sources(&records);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "k2");
        assert!(sources[1].id.starts_with("src_"));
        assert!(sources.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn first_occurrence_wins_on_duplicate_id() {
        let records = vec![
            search_record(vec![hit(Some("dup"), "first.md", "one", 0.2, Value::Null)]),
            search_record(vec![hit(Some("dup"), "second.md", "two", 0.9, Value::Null)]),
        ];
        let sources = extract_sources(&records);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "first.md");
    }

    #[test]
    fn ask_answer_ranks_first() {
        let records = vec![
            search_record(vec![hit(Some("k1"), "bio.pdf", "text", 1.0, Value::Null)]),
            ToolCallRecord {
                id: "call_2".into(),
                name: "ask_knowledge".into(),
                input: serde_json::json!({"question": "why?"}),
                result: CapabilityResult::KnowledgeAsk {
                    question: "why?".into(),
                    answer: "Because.".into(),
                },
            },
        ];
        let sources = extract_sources(&records);
        // Equal scores keep record order; the answer itself is always score 1.0
        assert_eq!(sources[1].name, ANSWER_SOURCE_NAME);
        assert_eq!(sources[1].score, 1.0);
        assert_eq!(sources[1].used_in_response, Some(true));
    }

    #[test]
    fn multi_search_is_flattened_and_failures_ignored() {
        let records = vec![
            ToolCallRecord {
                id: "call_1".into(),
                name: "multi_search".into(),
                input: Value::Null,
                result: CapabilityResult::MultiSearch {
                    searches: vec![
                        QueryResults {
                            query: "a".into(),
                            results: vec![hit(Some("a1"), "a.md", "x", 0.5, Value::Null)],
                            error: None,
                        },
                        QueryResults {
                            query: "b".into(),
                            results: vec![hit(Some("b1"), "b.md", "y", 0.7, Value::Null)],
                            error: None,
                        },
                    ],
                },
            },
            ToolCallRecord {
                id: "call_2".into(),
                name: "search_knowledge".into(),
                input: Value::Null,
                result: CapabilityResult::failure("timeout"),
            },
        ];
        let ids: Vec<String> = extract_sources(&records).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b1", "a1"]);
    }

    #[test]
    fn web_results_are_websites_keyed_by_url() {
        let records = vec![ToolCallRecord {
            id: "call_1".into(),
            name: "web_search".into(),
            input: Value::Null,
            result: CapabilityResult::WebSearch {
                query: "q".into(),
                results: vec![WebSearchResult {
                    title: String::new(),
                    url: "https://example.org/post".into(),
                    content: "snippet".into(),
                    score: Some(0.4),
                }],
            },
        }];
        let sources = extract_sources(&records);
        assert_eq!(sources[0].id, "https://example.org/post");
        assert_eq!(sources[0].name, "https://example.org/post");
        assert_eq!(sources[0].source_type, Some(SourceType::Website));
    }

    #[test]
    fn synthesized_id_uses_content_prefix() {
        let long_a = format!("{}{}", "x".repeat(50), "tail one");
        let long_b = format!("{}{}", "x".repeat(50), "tail two");
        assert_eq!(synthesize_id("n", &long_a), synthesize_id("n", &long_b));
        assert_ne!(synthesize_id("n", "abc"), synthesize_id("m", "abc"));
    }

    #[test]
    fn location_priority() {
        let meta = serde_json::json!({"page": 12, "chunk_index": 3, "timestamp": 3723});
        let loc = recover_location(meta.as_object().unwrap()).unwrap();
        assert_eq!(loc.kind, LocationType::Timecode);
        assert_eq!(loc.value, "01:02:03");

        let meta = serde_json::json!({"chunk_index": 3, "page_number": "12"});
        let loc = recover_location(meta.as_object().unwrap()).unwrap();
        assert_eq!(loc.kind, LocationType::Page);
        assert_eq!(loc.label.as_deref(), Some("Page 12"));

        let meta = serde_json::json!({"index": 4});
        let loc = recover_location(meta.as_object().unwrap()).unwrap();
        assert_eq!(loc.kind, LocationType::Index);
        assert_eq!(loc.value, "4");

        assert!(recover_location(&Map::new()).is_none());
    }

    #[test]
    fn source_type_inference() {
        let empty = Map::new();
        assert_eq!(infer_source_type("Lecture 3.PDF", &empty), Some(SourceType::Pdf));
        assert_eq!(infer_source_type("episode.mp3", &empty), Some(SourceType::Audio));
        assert_eq!(
            infer_source_type("https://www.youtube.com/watch?v=abc", &empty),
            Some(SourceType::Video)
        );
        assert_eq!(infer_source_type("https://rust-lang.org", &empty), Some(SourceType::Website));
        assert_eq!(infer_source_type("Untitled", &empty), None);

        let meta = serde_json::json!({"source_type": "audio"});
        assert_eq!(
            infer_source_type("notes.pdf", meta.as_object().unwrap()),
            Some(SourceType::Audio)
        );
    }

    #[test]
    fn long_content_is_truncated_in_excerpt() {
        let long = "word ".repeat(200);
        let e = excerpt(&long);
        assert!(e.ends_with("..."));
        assert_eq!(e.chars().count(), EXCERPT_CHARS + 3);
    }
}
