//! `quarry serve` — Start the HTTP API server.

use quarry_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_api_key() {
        tracing::warn!("No API key configured; research requests will fail until one is set");
    }

    println!("⛏  Quarry Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.strategy_model());
    println!(
        "   Knowledge: {}",
        config.knowledge.api_url.as_deref().unwrap_or("(in-memory, empty)")
    );

    quarry_gateway::start(config).await?;

    Ok(())
}
