//! Structured (schema-constrained) generation with two-layer repair.
//!
//! A structured call asks the model for JSON matching a schema. When the
//! reply does not deserialize into the target type:
//!
//! 1. syntactic repair (`repair::repair_into`) is tried, no network call;
//! 2. semantic repair sends the malformed text, the expected shape and the
//!    validation error back to the model at temperature 0, once.
//!
//! If both fail the call yields `GenerationError::InvalidResponse`, which
//! `generate_or_default` turns into `T::default()`.

use futures::FutureExt;
use quarry_core::error::{GenerationError, ProviderError};
use quarry_core::message::Message;
use quarry_core::provider::{ModelConfig, Provider, ProviderRequest, ResponseFormat};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::repair::{self, RepairError};
use crate::retry::{Fallback, RetryPolicy, with_error_handling};
use crate::router::ProviderRouter;

/// The expected output of a structured call.
#[derive(Debug, Clone)]
pub struct OutputShape {
    /// Schema name reported to the provider
    pub name: String,

    /// Plain-language description used in repair prompts
    pub description: String,

    /// JSON Schema of the expected object
    pub schema: serde_json::Value,
}

impl OutputShape {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }

    fn response_format(&self) -> ResponseFormat {
        ResponseFormat {
            name: self.name.clone(),
            schema: self.schema.clone(),
        }
    }
}

const REPAIR_SYSTEM_PROMPT: &str = "You repair malformed JSON. Reply with the corrected JSON only: \
no explanation, no markdown, no code fences. Keep every value the input already has; \
fill missing required fields with empty strings, empty arrays or null.";

pub struct StructuredGenerator {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    semantic_repair: bool,
    repair_model: Option<String>,
    fallback: Option<(Arc<dyn Provider>, String)>,
}

impl StructuredGenerator {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            semantic_repair: true,
            repair_model: None,
            fallback: None,
        }
    }

    /// The configured fallback model is resolved through `router`, so it
    /// may live on a different provider than `provider`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        router: &ProviderRouter,
        policy: RetryPolicy,
        config: &quarry_config::AppConfig,
    ) -> Self {
        Self {
            provider,
            policy,
            semantic_repair: config.repair.semantic,
            repair_model: config.repair.model.clone(),
            fallback: config.models.fallback_model.as_deref().and_then(|m| router.resolve(m)),
        }
    }

    /// Enable or disable the model-assisted repair layer.
    pub fn with_semantic_repair(mut self, enabled: bool) -> Self {
        self.semantic_repair = enabled;
        self
    }

    /// Model tried once on `provider` after the primary gives up.
    pub fn with_fallback(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.fallback = Some((provider, model.into()));
        self
    }

    /// Generate a `T` from `messages`.
    pub async fn generate<T: DeserializeOwned>(
        &self,
        config: ModelConfig,
        messages: Vec<Message>,
        shape: &OutputShape,
    ) -> Result<T, GenerationError> {
        let request = ProviderRequest::new(config.clone(), messages).with_response_format(shape.response_format());

        let fallback: Option<Fallback<'_, _>> = self.fallback.as_ref().map(|(provider, model)| {
            let mut fallback_request = request.clone();
            fallback_request.config.model = model.clone();
            let provider = provider.clone();
            Fallback::new(model, async move { provider.complete(fallback_request).await }.boxed())
        });

        let response = with_error_handling(
            &self.policy,
            &config.model,
            || self.provider.complete(request.clone()),
            fallback,
        )
        .await?;

        let raw = response.message.content;
        match serde_json::from_str::<T>(repair::strip_code_fences(&raw)) {
            Ok(value) => Ok(value),
            Err(e) => {
                debug!(model = %config.model, error = %e, "Structured output failed validation, repairing");
                self.repair(&raw, shape, &e.to_string(), &config.model).await
            }
        }
    }

    /// Generate a `T`, substituting `T::default()` when the output cannot
    /// be repaired. Other failures still propagate.
    pub async fn generate_or_default<T: DeserializeOwned + Default>(
        &self,
        config: ModelConfig,
        messages: Vec<Message>,
        shape: &OutputShape,
    ) -> Result<T, GenerationError> {
        match self.generate(config, messages, shape).await {
            Err(GenerationError::InvalidResponse { message }) => {
                warn!(shape = %shape.name, error = %message, "Structured output unrepairable, using defaults");
                Ok(T::default())
            }
            other => other,
        }
    }

    /// Recover a `T` from malformed output.
    pub async fn repair<T: DeserializeOwned>(
        &self,
        raw: &str,
        shape: &OutputShape,
        validation_error: &str,
        model: &str,
    ) -> Result<T, GenerationError> {
        let syntactic_error = match repair::repair_into::<T>(raw) {
            Ok(value) => {
                info!(shape = %shape.name, "Structured output recovered by syntactic repair");
                return Ok(value);
            }
            Err(e) => e,
        };

        // Output nested past the parser limit is not sent back to the model
        if !self.semantic_repair || syntactic_error == RepairError::TooDeep {
            return Err(invalid(shape, &syntactic_error));
        }

        let repaired = self
            .semantic_repair(raw, shape, validation_error, model)
            .await
            .map_err(|e| GenerationError::InvalidResponse {
                message: format!("semantic repair of '{}' failed: {e}", shape.name),
            })?;

        match repair::repair_into::<T>(&repaired) {
            Ok(value) => {
                info!(shape = %shape.name, "Structured output recovered by semantic repair");
                Ok(value)
            }
            Err(e) => Err(invalid(shape, &e)),
        }
    }

    /// One model call at temperature 0 asking for corrected JSON.
    async fn semantic_repair(
        &self,
        raw: &str,
        shape: &OutputShape,
        validation_error: &str,
        model: &str,
    ) -> Result<String, ProviderError> {
        let model = self.repair_model.as_deref().unwrap_or(model);
        let schema = serde_json::to_string_pretty(&shape.schema).unwrap_or_default();
        let prompt = format!(
            "Expected shape ({name}): {description}\n\nJSON Schema:\n{schema}\n\n\
             Validation error:\n{validation_error}\n\nMalformed output:\n{raw}",
            name = shape.name,
            description = shape.description,
        );

        let request = ProviderRequest::new(
            ModelConfig::new(model).with_temperature(0.0),
            vec![Message::system(REPAIR_SYSTEM_PROMPT), Message::user(prompt)],
        );

        let response = self.provider.complete(request).await?;
        Ok(repair::strip_code_fences(&response.message.content).to_string())
    }
}

fn invalid(shape: &OutputShape, err: &RepairError) -> GenerationError {
    GenerationError::InvalidResponse {
        message: format!("output for '{}' could not be repaired: {err}", shape.name),
    }
}
