//! The research facade: single-shot and streaming entry points over the
//! loop driver.

use crate::bridge::ResearchStream;
use crate::citation;
use crate::loop_runner::{AgentLoop, LoopOutcome};
use crate::prompt::build_messages;
use crate::sources::extract_sources;
use chrono::Utc;
use quarry_config::AppConfig;
use quarry_core::error::Error;
use quarry_core::event::{DomainEvent, EventBus};
use quarry_core::knowledge::{KnowledgeService, WebSearchService};
use quarry_core::message::Message;
use quarry_core::provider::ModelConfig;
use quarry_core::research::{ResearchQuery, ResearchResponse, ToolCallSummary};
use quarry_core::tool::{ToolContext, ToolRegistry};
use quarry_providers::{ProviderRouter, RetryPolicy, build_from_config};
use quarry_tools::{
    HttpKnowledgeService, HttpWebSearchService, InMemoryKnowledgeService, ToolsetOptions,
    research_registry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const QUERY_PREVIEW_CHARS: usize = 80;

/// Answers research queries against a knowledge service.
///
/// Capability registries are built once per agent so that notebook chat
/// sessions are reused across runs.
pub struct ResearchAgent {
    router: Arc<ProviderRouter>,
    config: AppConfig,
    policy: RetryPolicy,
    event_bus: Arc<EventBus>,
    knowledge: Arc<dyn KnowledgeService>,
    tools: Arc<ToolRegistry>,
    web_tools: Option<Arc<ToolRegistry>>,
}

/// Everything one run needs, resolved from the query and configuration.
struct PreparedRun {
    run_id: String,
    agent_loop: AgentLoop,
    messages: Vec<Message>,
    ctx: ToolContext,
    verbose: bool,
}

impl ResearchAgent {
    pub fn new(router: Arc<ProviderRouter>, knowledge: Arc<dyn KnowledgeService>, config: &AppConfig) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let tools = Arc::new(research_registry(
            knowledge.clone(),
            None,
            &ToolsetOptions::from_config(config),
        ));
        Self {
            router,
            config: config.clone(),
            policy: RetryPolicy::from_config(&config.retry).with_events(event_bus.clone()),
            event_bus,
            knowledge,
            tools,
            web_tools: None,
        }
    }

    /// Wire providers and collaborators from configuration.
    ///
    /// Without a knowledge service URL the agent runs against an empty
    /// in-memory knowledge base.
    pub fn from_config(config: &AppConfig) -> Self {
        let router = Arc::new(build_from_config(config));
        let knowledge: Arc<dyn KnowledgeService> = match HttpKnowledgeService::from_config(&config.knowledge) {
            Some(service) => Arc::new(service),
            None => {
                warn!("No knowledge service URL configured; using an empty in-memory knowledge base");
                Arc::new(InMemoryKnowledgeService::new())
            }
        };

        let agent = Self::new(router, knowledge, config);
        match HttpWebSearchService::from_config(&config.web_search) {
            Some(web) => agent.with_web_search(Arc::new(web)),
            None => agent,
        }
    }

    /// Enable the `web_search` capability for queries that ask for it.
    pub fn with_web_search(mut self, web: Arc<dyn WebSearchService>) -> Self {
        let options = ToolsetOptions::from_config(&self.config).with_search_web(true);
        self.web_tools = Some(Arc::new(research_registry(
            self.knowledge.clone(),
            Some(web),
            &options,
        )));
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.policy = self.policy.with_events(event_bus.clone());
        self.event_bus = event_bus;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy.with_events(self.event_bus.clone());
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// The capabilities a query sees.
    pub fn tools_for(&self, search_web: bool) -> &Arc<ToolRegistry> {
        match (&self.web_tools, search_web) {
            (Some(web), true) => web,
            _ => &self.tools,
        }
    }

    /// Run a query to completion.
    pub async fn research(&self, query: ResearchQuery) -> Result<ResearchResponse, Error> {
        let run = self.prepare(&query, false, CancellationToken::new())?;
        let run_id = run.run_id.clone();

        let outcome = run
            .agent_loop
            .run(run.messages, &run.ctx, &run_id, |report| {
                debug!(run_id = %run_id, step = report.step, tool_calls = report.records.len(), "Step finished");
            })
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.event_bus.publish(DomainEvent::ErrorOccurred {
                    context: format!("research:{run_id}"),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
        };

        Ok(self.respond(&run_id, outcome, run.verbose))
    }

    /// Start a streamed run. The returned stream owns the run: dropping it
    /// cancels the loop.
    pub fn research_stream(&self, query: ResearchQuery) -> Result<ResearchStream, Error> {
        let cancel = CancellationToken::new();
        let run = self.prepare(&query, true, cancel.clone())?;
        let run_id = run.run_id.clone();
        let PreparedRun {
            agent_loop,
            messages,
            ctx,
            verbose,
            ..
        } = run;

        let producer_run_id = run_id.clone();
        let stream = ResearchStream::spawn("Researching", verbose, cancel, move |sink| async move {
            agent_loop
                .run(messages, &ctx, &producer_run_id, |report| sink.push_step(&report))
                .await
        });

        Ok(stream.with_events(run_id, self.event_bus.clone()))
    }

    fn prepare(&self, query: &ResearchQuery, streaming: bool, cancel: CancellationToken) -> Result<PreparedRun, Error> {
        if query.query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".into()));
        }

        let overrides = query.overrides().or(&self.config.default_overrides());
        let model = overrides
            .strategy_model
            .clone()
            .unwrap_or_else(|| self.config.strategy_model().to_string());
        let (provider, model_id) = self.router.resolve(&model).ok_or_else(|| Error::Config {
            message: format!("no provider registered for model '{model}'"),
        })?;

        let fallback = self
            .config
            .models
            .fallback_model
            .as_deref()
            .and_then(|m| self.router.resolve(m));

        let deadline = match self.config.research.deadline_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let tools = self.tools_for(query.search_web).clone();
        let max_steps = query.effective_max_steps(self.config.research.max_steps);
        let messages = build_messages(query, &tools.definitions(), self.config.research.history_window);

        let model_config = ModelConfig::new(&model_id)
            .with_temperature(self.config.default_temperature)
            .with_max_tokens(self.config.default_max_tokens);

        let agent_loop = AgentLoop::new(provider, model_config, tools, self.event_bus.clone())
            .with_policy(self.policy.clone())
            .with_max_steps(max_steps)
            .with_fallback(fallback)
            .with_deadline(deadline);

        let ctx = ToolContext::new(cancel)
            .with_overrides(overrides)
            .with_scope(query.channel_id.clone(), query.notebook_id.clone());

        let run_id = format!("run_{}", uuid::Uuid::new_v4().simple());
        info!(run_id = %run_id, model = %model_id, max_steps, streaming, "Research started");
        self.event_bus.publish(DomainEvent::ResearchStarted {
            run_id: run_id.clone(),
            query_preview: query.query.chars().take(QUERY_PREVIEW_CHARS).collect(),
            max_steps,
            streaming,
            timestamp: Utc::now(),
        });

        Ok(PreparedRun {
            run_id,
            agent_loop,
            messages,
            ctx,
            verbose: query.verbose || self.config.research.verbose,
        })
    }

    fn respond(&self, run_id: &str, outcome: LoopOutcome, verbose: bool) -> ResearchResponse {
        let mut sources = extract_sources(&outcome.records);
        citation::mark_used(&mut sources, &outcome.text);

        self.event_bus.publish(DomainEvent::ResearchCompleted {
            run_id: run_id.to_string(),
            steps: outcome.steps,
            tool_calls: outcome.records.len(),
            sources: sources.len(),
            timestamp: Utc::now(),
        });
        info!(run_id, steps = outcome.steps, sources = sources.len(), "Research completed");

        let tool_calls = verbose.then(|| {
            outcome
                .records
                .iter()
                .map(|r| ToolCallSummary {
                    name: r.name.clone(),
                    result: r.result.to_payload(),
                })
                .collect()
        });

        ResearchResponse {
            response: outcome.text,
            sources: (!sources.is_empty()).then_some(sources),
            tool_calls,
            steps: Some(outcome.steps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_event::ResearchEvent;
    use crate::test_helpers::*;
    use futures::StreamExt;
    use quarry_core::error::{GenerationError, KnowledgeError, ProviderError};
    use quarry_core::knowledge::WebSearchResult;
    use quarry_core::research::ModelOverrides;

    struct NoWeb;

    #[async_trait::async_trait]
    impl WebSearchService for NoWeb {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSearchResult>, KnowledgeError> {
            Ok(vec![])
        }
    }

    fn knowledge() -> Arc<InMemoryKnowledgeService> {
        Arc::new(
            InMemoryKnowledgeService::new()
                .with_document("biology.pdf", "Photosynthesis converts light into chemical energy", 0.9)
                .with_document("notes.md", "Photosynthesis happens in chloroplasts", 0.6),
        )
    }

    fn agent_with(provider: Arc<SequentialMockProvider>, config: AppConfig) -> ResearchAgent {
        let mut router = ProviderRouter::new("mock");
        router.register("mock", provider);
        ResearchAgent::new(Arc::new(router), knowledge(), &config).with_policy(RetryPolicy::no_retry())
    }

    fn agent(provider: Arc<SequentialMockProvider>) -> ResearchAgent {
        agent_with(provider, AppConfig::default())
    }

    #[tokio::test]
    async fn answers_without_tools() {
        let provider = Arc::new(SequentialMockProvider::single_text("Plants make sugar from light."));
        let response = agent(provider.clone())
            .research(ResearchQuery::new("What is photosynthesis?"))
            .await
            .unwrap();

        assert_eq!(response.response, "Plants make sugar from light.");
        assert!(response.sources.is_none());
        assert_eq!(response.steps, Some(1));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn search_results_become_sources() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("search_knowledge", serde_json::json!({"query": "photosynthesis"}))],
            "",
            "It converts light.",
        ));
        let response = agent(provider)
            .research(ResearchQuery::new("What is photosynthesis?").verbose(true))
            .await
            .unwrap();

        let sources = response.sources.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "biology.pdf");
        assert!(sources[0].score >= sources[1].score);

        let tool_calls = response.tool_calls.unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "search_knowledge");
    }

    #[tokio::test]
    async fn tool_calls_omitted_unless_verbose() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("search_knowledge", serde_json::json!({"query": "photosynthesis"}))],
            "",
            "Done.",
        ));
        let response = agent(provider)
            .research(ResearchQuery::new("What is photosynthesis?"))
            .await
            .unwrap();
        assert!(response.tool_calls.is_none());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let err = agent(provider).research(ResearchQuery::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn strategy_override_selects_loop_model() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let mut query = ResearchQuery::new("q");
        query.model_config = Some(ModelOverrides {
            strategy_model: Some("mock:special-model".into()),
            ..ModelOverrides::default()
        });

        agent(provider.clone()).research(query).await.unwrap();
        assert_eq!(provider.requests()[0].config.model, "special-model");
    }

    #[tokio::test]
    async fn configured_strategy_model_is_default() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let mut config = AppConfig::default();
        config.models.strategy_model = Some("configured-model".into());

        agent_with(provider.clone(), config)
            .research(ResearchQuery::new("q"))
            .await
            .unwrap();
        assert_eq!(provider.requests()[0].config.model, "configured-model");
    }

    #[tokio::test]
    async fn step_bound_from_query() {
        let provider = Arc::new(SequentialMockProvider::new(vec![make_tool_call_response(
            vec![make_tool_call("search_knowledge", serde_json::json!({"query": "photosynthesis"}))],
            "Searching.",
        )]));
        let response = agent(provider.clone())
            .research(ResearchQuery::new("q").with_max_steps(1))
            .await
            .unwrap();

        assert_eq!(response.steps, Some(1));
        assert_eq!(response.response, "Searching.");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn generation_failure_is_reported() {
        let provider = Arc::new(SequentialMockProvider::from_results(vec![Err(
            ProviderError::ContentFiltered("blocked".into()),
        )]));
        let agent = agent(provider);
        let mut events = agent.event_bus().subscribe();

        let err = agent.research(ResearchQuery::new("q")).await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::ContentFilter { .. })));

        let started = events.recv().await.unwrap();
        assert!(matches!(started.as_ref(), DomainEvent::ResearchStarted { streaming: false, .. }));
        let failed = events.recv().await.unwrap();
        assert!(matches!(failed.as_ref(), DomainEvent::ErrorOccurred { .. }));
    }

    #[tokio::test]
    async fn fallback_model_routes_to_its_provider() {
        let primary = Arc::new(SequentialMockProvider::from_results(vec![Err(
            ProviderError::AuthenticationFailed("revoked".into()),
        )]));
        let other = Arc::new(SequentialMockProvider::single_text("answered by the other provider"));
        let mut router = ProviderRouter::new("mock");
        router.register("mock", primary.clone());
        router.register("other", other.clone());

        let mut config = AppConfig::default();
        config.models.fallback_model = Some("other:m2".into());
        let agent = ResearchAgent::new(Arc::new(router), knowledge(), &config).with_policy(RetryPolicy::no_retry());

        let response = agent.research(ResearchQuery::new("q")).await.unwrap();
        assert_eq!(response.response, "answered by the other provider");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(other.call_count(), 1);
        assert_eq!(other.requests()[0].config.model, "m2");
    }

    #[tokio::test]
    async fn web_search_only_when_requested() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let agent = agent(provider).with_web_search(Arc::new(NoWeb));

        assert!(!agent.tools_for(false).names().contains(&"web_search"));
        assert!(agent.tools_for(true).names().contains(&"web_search"));
    }

    #[test]
    fn default_config_runs_offline() {
        let agent = ResearchAgent::from_config(&AppConfig::default());
        let names = agent.tools_for(true).names();
        assert!(names.contains(&"search_knowledge"));
        assert!(!names.contains(&"web_search"));
    }

    #[tokio::test]
    async fn stream_ends_with_done() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("search_knowledge", serde_json::json!({"query": "photosynthesis"}))],
            "",
            "Light to sugar.",
        ));
        let stream = agent(provider)
            .research_stream(ResearchQuery::new("q").verbose(true))
            .unwrap();
        let events: Vec<ResearchEvent> = stream.collect().await;

        let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, vec!["status", "tool_start", "tool_result", "delta", "sources", "done"]);
    }

    #[tokio::test]
    async fn stream_rejects_empty_query_up_front() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        assert!(matches!(
            agent(provider).research_stream(ResearchQuery::new("")),
            Err(Error::InvalidRequest(_))
        ));
    }
}
