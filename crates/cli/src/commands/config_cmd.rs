//! `quarry config` — Configuration helpers.

use clap::Subcommand;
use quarry_config::AppConfig;

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
    /// Print the default configuration as TOML
    Default,
    /// Print the effective configuration (secrets redacted)
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the configuration
    Validate,
}

pub fn run(action: Option<ConfigAction>) -> Result<(), Box<dyn std::error::Error>> {
    match action.unwrap_or(ConfigAction::Default) {
        ConfigAction::Default => print!("{}", AppConfig::default_toml()),
        ConfigAction::Show => {
            let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
            println!("{}", redacted_toml(&config)?);
        }
        ConfigAction::Path => println!("{}", AppConfig::config_dir().join("config.toml").display()),
        ConfigAction::Validate => validate()?,
    }
    Ok(())
}

fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set QUARRY_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY)");
    }
    if config.knowledge.api_url.is_none() {
        warnings.push("No knowledge service URL; research runs against an empty in-memory knowledge base");
    }
    if config.web_search.enabled && config.web_search.api_key.is_none() {
        warnings.push("web_search.enabled is set but no web search API key is configured");
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Provider:   {}", config.default_provider);
    println!("   Model:      {}", config.strategy_model());
    println!("   Max steps:  {}", config.research.max_steps);
    println!("   Gateway:    {}:{}", config.gateway.host, config.gateway.port);
    Ok(())
}

/// The config as TOML with every secret replaced.
fn redacted_toml(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut config = config.clone();
    let redact = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("***".into());
        }
    };
    redact(&mut config.api_key);
    redact(&mut config.knowledge.api_key);
    redact(&mut config.web_search.api_key);
    for provider in config.providers.values_mut() {
        redact(&mut provider.api_key);
    }
    toml::to_string_pretty(&config)
}
