//! Scripted provider for unit tests.

use async_trait::async_trait;
use quarry_core::error::ProviderError;
use quarry_core::message::Message;
use quarry_core::provider::{Provider, ProviderRequest, ProviderResponse};
use std::sync::Mutex;

/// Replies with scripted texts or errors, in order, and records every
/// request it receives.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(mut replies: Vec<Result<String, ProviderError>>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let model = request.config.model.clone();
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or(Err(ProviderError::EmptyResponse))?;
        Ok(ProviderResponse {
            message: Message::assistant(reply),
            usage: None,
            model,
            finish_reason: None,
        })
    }
}
