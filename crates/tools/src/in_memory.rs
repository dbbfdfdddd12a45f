//! In-memory knowledge service backed by a fixed set of passages.
//!
//! Used by tests across the workspace and as the fallback backend when no
//! knowledge service URL is configured.
//! Search is a case-insensitive keyword match; `ask` and notebook chat
//! return a configured answer.

use async_trait::async_trait;
use quarry_core::error::KnowledgeError;
use quarry_core::knowledge::*;
use quarry_core::research::ModelOverrides;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

const DEFAULT_ANSWER: &str = "The knowledge base has no answer for this question.";

pub struct InMemoryKnowledgeService {
    documents: Vec<KnowledgeSearchResult>,
    answer: String,
    failure: Option<KnowledgeError>,
    searches: AtomicUsize,
    sessions: AtomicUsize,
    last_overrides: Mutex<Option<ModelOverrides>>,
}

impl InMemoryKnowledgeService {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
            answer: DEFAULT_ANSWER.into(),
            failure: None,
            searches: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            last_overrides: Mutex::new(None),
        }
    }

    /// Add a passage with no id or metadata.
    pub fn with_document(self, source_name: &str, content: &str, score: f64) -> Self {
        self.with_result(KnowledgeSearchResult {
            id: None,
            source_name: source_name.into(),
            content: content.into(),
            score,
            metadata: serde_json::Map::new(),
        })
    }

    pub fn with_result(mut self, result: KnowledgeSearchResult) -> Self {
        self.documents.push(result);
        self
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = answer.into();
        self
    }

    /// Make every call fail with `error`.
    pub fn with_failure(mut self, error: KnowledgeError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Overrides received by the most recent `ask`.
    pub fn last_overrides(&self) -> Option<ModelOverrides> {
        self.last_overrides
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self) -> Result<(), KnowledgeError> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn matches(doc: &KnowledgeSearchResult, terms: &[String]) -> bool {
        let haystack = format!("{} {}", doc.source_name, doc.content).to_lowercase();
        terms.iter().any(|t| haystack.contains(t.as_str()))
    }
}

impl Default for InMemoryKnowledgeService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeService for InMemoryKnowledgeService {
    async fn search(&self, request: SearchRequest) -> Result<Vec<KnowledgeSearchResult>, KnowledgeError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let terms: Vec<String> = request
            .query
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| t.len() >= 3)
            .collect();

        let mut hits: Vec<KnowledgeSearchResult> = self
            .documents
            .iter()
            .filter(|d| d.score >= request.min_score && Self::matches(d, &terms))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(request.limit);
        Ok(hits)
    }

    async fn ask(&self, _question: &str, overrides: &ModelOverrides) -> Result<KnowledgeAnswer, KnowledgeError> {
        *self.last_overrides.lock().unwrap_or_else(PoisonError::into_inner) = Some(overrides.clone());
        self.check()?;
        Ok(KnowledgeAnswer {
            answer: self.answer.clone(),
        })
    }

    async fn create_session(&self, notebook_id: &str) -> Result<ChatSession, KnowledgeError> {
        self.check()?;
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChatSession {
            id: format!("session_{n}"),
            notebook_id: notebook_id.into(),
        })
    }

    async fn execute_chat(&self, _session_id: &str, message: &str) -> Result<Vec<NotebookChatMessage>, KnowledgeError> {
        self.check()?;
        Ok(vec![
            NotebookChatMessage {
                role: "user".into(),
                content: message.into(),
            },
            NotebookChatMessage {
                role: "assistant".into(),
                content: self.answer.clone(),
            },
        ])
    }

    async fn build_context(&self, _notebook_id: &str) -> Result<NotebookContext, KnowledgeError> {
        self.check()?;
        let mut names: Vec<&str> = self.documents.iter().map(|d| d.source_name.as_str()).collect();
        names.sort_unstable();
        names.dedup();

        let context = self
            .documents
            .iter()
            .map(|d| format!("## {}\n{}", d.source_name, d.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(NotebookContext {
            token_count: Some(context.split_whitespace().count()),
            context,
            source_count: names.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_orders_by_score_and_limits() {
        let service = InMemoryKnowledgeService::new()
            .with_document("a.md", "soil carbon low", 0.3)
            .with_document("b.md", "soil carbon high", 0.9)
            .with_document("c.md", "soil carbon mid", 0.6);

        let mut request = SearchRequest::new("Soil?");
        request.limit = 2;
        let hits = service.search(request).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.source_name.as_str()).collect();
        assert_eq!(names, vec!["b.md", "c.md"]);
    }

    #[tokio::test]
    async fn min_score_filters() {
        let service = InMemoryKnowledgeService::new()
            .with_document("a.md", "soil", 0.3)
            .with_document("b.md", "soil", 0.9);
        let mut request = SearchRequest::new("soil");
        request.min_score = 0.5;
        assert_eq!(service.search(request).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failure_applies_to_every_call() {
        let service = InMemoryKnowledgeService::new()
            .with_failure(KnowledgeError::NotConfigured("offline".into()));
        assert!(service.search(SearchRequest::new("x")).await.is_err());
        assert!(service.create_session("nb").await.is_err());
        assert_eq!(service.search_count(), 1);
    }
}
