//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/research`          — Run a research query, get the full answer
//! - `POST /v1/research/stream`   — Run a research query, get NDJSON events
//! - `GET  /v1/tools`             — List available capabilities
//! - `GET  /v1/logs`              — SSE stream of domain events

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{error, info};

use quarry_agent::{ResearchAgent, user_facing};
use quarry_core::error::{Error, GenerationError};
use quarry_core::event::DomainEvent;
use quarry_core::research::{ResearchQuery, ResearchResponse};

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub agent: Arc<ResearchAgent>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl ApiV1State {
    pub fn new(agent: Arc<ResearchAgent>) -> Self {
        Self {
            agent,
            start_time: chrono::Utc::now(),
        }
    }
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/research", post(research_handler))
        .route("/research/stream", post(research_stream_handler))
        .route("/tools", get(list_tools_handler))
        .route("/logs", get(log_stream_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize, Deserialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDto>,
    pub count: usize,
    pub uptime_secs: i64,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Status code for a failed research run.
fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        Error::Generation(generation) => generation_status(generation),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn generation_status(err: &GenerationError) -> StatusCode {
    match err {
        GenerationError::ContentFilter { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GenerationError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        GenerationError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: Error) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(error = %err, "Research request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: user_facing(&err),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn research_handler(
    State(state): State<SharedApiState>,
    Json(query): Json<ResearchQuery>,
) -> Result<Json<ResearchResponse>, ApiError> {
    info!(
        query_len = query.query.len(),
        notebook = ?query.notebook_id,
        "v1/research request"
    );

    state.agent.research(query).await.map(Json).map_err(api_error)
}

/// `POST /v1/research/stream` — one `ResearchEvent` JSON object per line.
///
/// Closing the connection drops the stream, which cancels the run.
async fn research_stream_handler(
    State(state): State<SharedApiState>,
    Json(query): Json<ResearchQuery>,
) -> Result<Response, ApiError> {
    info!(query_len = query.query.len(), verbose = query.verbose, "v1/research/stream request");

    let stream = state.agent.research_stream(query).map_err(api_error)?;
    let body = Body::from_stream(stream.map(|event| Ok::<_, Infallible>(event.to_ndjson())));

    Ok((
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

async fn list_tools_handler(State(state): State<SharedApiState>) -> Json<ToolListResponse> {
    let defs = state.agent.tools_for(true).definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
    })
}

// ── SSE Log Stream ────────────────────────────────────────────────────────

/// `GET /v1/logs` — SSE stream of domain events (runs, tool calls, retries).
async fn log_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.agent.event_bus().subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event_name(&event)).data(data))
        });

    Sse::new(stream)
}

fn event_name(event: &DomainEvent) -> &'static str {
    match event {
        DomainEvent::ResearchStarted { .. } => "research_started",
        DomainEvent::ToolExecuted { .. } => "tool_executed",
        DomainEvent::GenerationRetried { .. } => "generation_retried",
        DomainEvent::ResearchCompleted { .. } => "research_completed",
        DomainEvent::ErrorOccurred { .. } => "error_occurred",
    }
}
