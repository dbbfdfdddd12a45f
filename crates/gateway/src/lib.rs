//! HTTP API gateway for Quarry.
//!
//! Exposes the research agent over REST: a health check, the capability
//! catalogue, single-shot research, NDJSON-streamed research and an SSE
//! feed of domain events.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use quarry_agent::ResearchAgent;

/// Request bodies above this size are rejected.
const BODY_LIMIT: usize = 1024 * 1024;

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: api_v1::SharedApiState, cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT));

    let router = if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: quarry_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let agent = Arc::new(ResearchAgent::from_config(&config));
    let state = Arc::new(api_v1::ApiV1State::new(agent));
    let app = build_router(state, config.gateway.cors);

    info!(addr = %addr, model = %config.strategy_model(), "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint() {
        let agent = Arc::new(ResearchAgent::from_config(&quarry_config::AppConfig::default()));
        let app = build_router(Arc::new(api_v1::ApiV1State::new(agent)), false);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_headers_when_enabled() {
        let agent = Arc::new(ResearchAgent::from_config(&quarry_config::AppConfig::default()));
        let app = build_router(Arc::new(api_v1::ApiV1State::new(agent)), true);

        let req = Request::builder()
            .uri("/health")
            .header("Origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }
}
