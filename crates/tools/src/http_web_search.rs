//! Web search client for Tavily-style search APIs.
//!
//! `POST api_url` with `{api_key, query, max_results}`; the reply carries
//! `{results: [{title, url, content, score}]}`.

use async_trait::async_trait;
use quarry_core::error::KnowledgeError;
use quarry_core::knowledge::{WebSearchResult, WebSearchService};
use serde::Deserialize;
use std::time::Duration;

pub struct HttpWebSearchService {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpWebSearchService {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// `None` unless web search is enabled and has a key.
    pub fn from_config(config: &quarry_config::WebSearchConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let key = config.api_key.as_deref().filter(|k| !k.is_empty())?;
        Some(Self::new(&config.api_url, key))
    }
}

#[derive(Deserialize)]
struct SearchReply {
    #[serde(default)]
    results: Vec<WebSearchResult>,
}

#[async_trait]
impl WebSearchService for HttpWebSearchService {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchResult>, KnowledgeError> {
        let response = self
            .client
            .post(&self.api_url)
            .json(&serde_json::json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| KnowledgeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KnowledgeError::Api {
                status_code: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let reply: SearchReply = response
            .json()
            .await
            .map_err(|e| KnowledgeError::InvalidPayload(e.to_string()))?;

        let mut results = reply.results;
        results.truncate(max_results);
        Ok(results)
    }
}
