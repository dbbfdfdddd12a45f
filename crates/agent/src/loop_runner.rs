//! The research loop driver.
//!
//! Each step makes one model call (through the retry policy) and executes
//! the capability calls the model requested, in order. The loop ends when
//! the model answers without calling a capability, or after `max_steps`
//! steps; hitting the bound is not an error.

use futures::FutureExt;
use quarry_core::error::Error;
use quarry_core::event::{DomainEvent, EventBus};
use quarry_core::message::Message;
use quarry_core::provider::{ModelConfig, Provider, ProviderRequest};
use quarry_core::tool::{ToolCallRecord, ToolContext, ToolRegistry};
use quarry_providers::retry::{Fallback, RetryPolicy, with_error_handling};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one completed step produced.
#[derive(Debug, Clone, Copy)]
pub struct StepReport<'a> {
    /// 1-based step number
    pub step: u32,
    /// Text the model produced in this step
    pub text: &'a str,
    /// Capability calls made in this step, in order
    pub records: &'a [ToolCallRecord],
}

/// The result of a finished loop.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Concatenated text of every step
    pub text: String,
    pub records: Vec<ToolCallRecord>,
    pub steps: u32,
}

/// The loop that drives model calls and capability execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    config: ModelConfig,
    tools: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
    policy: RetryPolicy,
    fallback: Option<(Arc<dyn Provider>, String)>,
    max_steps: u32,
    deadline: Option<Duration>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        config: ModelConfig,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            provider,
            config,
            tools,
            event_bus,
            policy: RetryPolicy::default(),
            fallback: None,
            max_steps: 10,
            deadline: None,
        }
    }

    /// Set the step bound. Values below 1 are raised to 1.
    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max.max(1);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Provider and model tried once after the primary model exhausts its
    /// retries.
    pub fn with_fallback(mut self, fallback: Option<(Arc<dyn Provider>, String)>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Wall-clock limit for the whole run.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the loop over `messages`, calling `on_step` after every step.
    ///
    /// Stops early with `Error::Cancelled` when `ctx.cancel` fires and with
    /// `Error::DeadlineExceeded` when the deadline passes.
    pub async fn run<F>(
        &self,
        messages: Vec<Message>,
        ctx: &ToolContext,
        run_id: &str,
        mut on_step: F,
    ) -> Result<LoopOutcome, Error>
    where
        F: FnMut(StepReport<'_>) + Send,
    {
        let cancellable = async {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
                outcome = self.drive(messages, ctx, run_id, &mut on_step) => outcome,
            }
        };

        let outcome = match self.deadline {
            Some(limit) => match tokio::time::timeout(limit, cancellable).await {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::DeadlineExceeded(limit)),
            },
            None => cancellable.await,
        };

        if let Err(e) = &outcome {
            warn!(run_id, error = %e, "Research loop ended with an error");
        }
        outcome
    }

    async fn drive<F>(
        &self,
        mut conversation: Vec<Message>,
        ctx: &ToolContext,
        run_id: &str,
        on_step: &mut F,
    ) -> Result<LoopOutcome, Error>
    where
        F: FnMut(StepReport<'_>) + Send,
    {
        let definitions = self.tools.definitions();
        let mut text = String::new();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut step = 0;
        let mut answered = false;

        while step < self.max_steps {
            step += 1;
            debug!(run_id, step, max_steps = self.max_steps, "Research step");

            let request = ProviderRequest::new(self.config.clone(), conversation.clone())
                .with_tools(definitions.clone());

            let fallback: Option<Fallback<'_, _>> = self.fallback.as_ref().map(|(provider, model)| {
                let mut fallback_request = request.clone();
                fallback_request.config.model = model.clone();
                let provider = provider.clone();
                Fallback::new(model, async move { provider.complete(fallback_request).await }.boxed())
            });

            let response = with_error_handling(
                &self.policy,
                &self.config.model,
                || self.provider.complete(request.clone()),
                fallback,
            )
            .await?;

            let message = response.message;
            let step_text = message.content.clone();
            let calls = message.tool_calls.clone();
            conversation.push(message);

            let mut step_records = Vec::with_capacity(calls.len());
            for call in &calls {
                let input = parse_arguments(&call.arguments);
                let result = self.tools.execute(&call.name, input.clone(), ctx).await;

                self.event_bus.publish(DomainEvent::ToolExecuted {
                    run_id: run_id.to_string(),
                    tool_name: call.name.clone(),
                    success: result.is_success(),
                    timestamp: chrono::Utc::now(),
                });

                conversation.push(Message::tool_result(&call.id, result.to_payload().to_string()));
                step_records.push(ToolCallRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input,
                    result,
                });
            }

            on_step(StepReport {
                step,
                text: &step_text,
                records: &step_records,
            });

            text.push_str(&step_text);
            records.extend(step_records);

            if calls.is_empty() {
                answered = true;
                break;
            }
        }

        if !answered {
            info!(run_id, steps = step, "Step bound reached before a final answer");
        }

        Ok(LoopOutcome {
            text,
            records,
            steps: step,
        })
    }
}

/// Tool-call arguments as JSON. Slightly malformed argument strings go
/// through syntactic repair; anything unrecoverable becomes `{}` so the
/// capability reports the missing argument to the model.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match quarry_providers::repair_json(raw) {
        Ok(value) if value.is_object() => value,
        _ => {
            warn!(arguments = %raw, "Unparseable tool arguments");
            serde_json::json!({})
        }
    }
}
