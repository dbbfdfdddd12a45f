//! Configuration loading, validation, and management for Quarry.
//!
//! Loads configuration from `~/.quarry/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.quarry/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default model provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model driving the research loop
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Per-role model defaults
    #[serde(default)]
    pub models: ModelsConfig,

    /// Research loop settings
    #[serde(default)]
    pub research: ResearchConfig,

    /// Retry and backoff policy for generation calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Structured-output repair settings
    #[serde(default)]
    pub repair: RepairConfig,

    /// Knowledge retrieval service
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Optional web search service
    #[serde(default)]
    pub web_search: WebSearchConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("models", &self.models)
            .field("research", &self.research)
            .field("retry", &self.retry)
            .field("repair", &self.repair)
            .field("knowledge", &self.knowledge)
            .field("web_search", &self.web_search)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for KnowledgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("search_limit", &self.search_limit)
            .field("min_score", &self.min_score)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for WebSearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchConfig")
            .field("enabled", &self.enabled)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("max_results", &self.max_results)
            .finish()
    }
}

/// Models used for each role. Unset roles fall back to `default_model`
/// (strategy) or to the knowledge service's own choice (answer, final).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer_model: Option<String>,

    /// Tried once when the strategy model keeps failing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Step bound when the request does not give one
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock bound for one research run (0 disables)
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Default for the request's verbose flag
    #[serde(default)]
    pub verbose: bool,

    /// Expose draft_article / draft_post
    #[serde(default)]
    pub intent_tools: bool,

    /// How many prior conversation messages reach the prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_max_steps() -> u32 {
    10
}
fn default_deadline_secs() -> u64 {
    300
}
fn default_history_window() -> usize {
    10
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            deadline_secs: default_deadline_secs(),
            verbose: false,
            intent_tools: false,
            history_window: default_history_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_rate_limit_base_ms")]
    pub rate_limit_base_ms: u64,

    #[serde(default = "default_rate_limit_max_ms")]
    pub rate_limit_max_ms: u64,

    #[serde(default = "default_transient_base_ms")]
    pub transient_base_ms: u64,

    #[serde(default = "default_transient_max_ms")]
    pub transient_max_ms: u64,

    /// Upper bound of the random jitter added to transient delays
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    4
}
fn default_rate_limit_base_ms() -> u64 {
    10_000
}
fn default_rate_limit_max_ms() -> u64 {
    120_000
}
fn default_transient_base_ms() -> u64 {
    2_000
}
fn default_transient_max_ms() -> u64 {
    15_000
}
fn default_jitter_ms() -> u64 {
    1_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            rate_limit_base_ms: default_rate_limit_base_ms(),
            rate_limit_max_ms: default_rate_limit_max_ms(),
            transient_base_ms: default_transient_base_ms(),
            transient_max_ms: default_transient_max_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Allow the model-assisted second repair layer
    #[serde(default = "default_true")]
    pub semantic: bool,

    /// Model for semantic repair (defaults to the generating model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            semantic: true,
            model: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Base URL of the knowledge service; unset disables knowledge capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default result limit for searches
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    #[serde(default)]
    pub min_score: f64,

    /// How long a notebook chat session is reused
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_search_limit() -> usize {
    10
}
fn default_session_ttl_secs() -> u64 {
    1800
}
fn default_http_timeout_secs() -> u64 {
    60
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            search_limit: default_search_limit(),
            min_score: 0.0,
            session_ttl_secs: default_session_ttl_secs(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_web_search_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_web_max_results")]
    pub max_results: usize,
}

fn default_web_search_url() -> String {
    "https://api.tavily.com/search".into()
}
fn default_web_max_results() -> usize {
    5
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: default_web_search_url(),
            api_key: None,
            max_results: default_web_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Permissive CORS for browser clients
    #[serde(default)]
    pub cors: bool,
}

fn default_port() -> u16 {
    8787
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.quarry/config.toml).
    ///
    /// Environment overrides:
    /// - `QUARRY_API_KEY` (highest priority), `OPENAI_API_KEY`, `OPENROUTER_API_KEY`
    /// - `QUARRY_PROVIDER`, `QUARRY_MODEL`
    /// - `QUARRY_KNOWLEDGE_URL`, `QUARRY_KNOWLEDGE_API_KEY`
    /// - `QUARRY_WEB_SEARCH_API_KEY` (also enables web search)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("QUARRY_API_KEY")
                .or_else(|| var("OPENAI_API_KEY"))
                .or_else(|| var("OPENROUTER_API_KEY"));
        }
        if let Some(provider) = var("QUARRY_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = var("QUARRY_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = var("QUARRY_KNOWLEDGE_URL") {
            self.knowledge.api_url = Some(url);
        }
        if let Some(key) = var("QUARRY_KNOWLEDGE_API_KEY") {
            self.knowledge.api_key = Some(key);
        }
        if let Some(key) = var("QUARRY_WEB_SEARCH_API_KEY") {
            self.web_search.api_key = Some(key);
            self.web_search.enabled = true;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".quarry")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.research.max_steps == 0 {
            return Err(ConfigError::ValidationError("research.max_steps must be >= 1".into()));
        }

        if self.retry.rate_limit_max_ms < self.retry.rate_limit_base_ms {
            return Err(ConfigError::ValidationError(
                "retry.rate_limit_max_ms must be >= retry.rate_limit_base_ms".into(),
            ));
        }

        if self.retry.transient_max_ms < self.retry.transient_base_ms {
            return Err(ConfigError::ValidationError(
                "retry.transient_max_ms must be >= retry.transient_base_ms".into(),
            ));
        }

        if self.web_search.max_results == 0 {
            return Err(ConfigError::ValidationError("web_search.max_results must be >= 1".into()));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The model driving the research loop.
    pub fn strategy_model(&self) -> &str {
        self.models.strategy_model.as_deref().unwrap_or(&self.default_model)
    }

    /// Configured per-role models as request overrides; request values win
    /// when merged.
    pub fn default_overrides(&self) -> quarry_core::ModelOverrides {
        quarry_core::ModelOverrides {
            strategy_model: self.models.strategy_model.clone(),
            answer_model: self.models.answer_model.clone(),
            final_answer_model: self.models.final_answer_model.clone(),
        }
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            models: ModelsConfig::default(),
            research: ResearchConfig::default(),
            retry: RetryConfig::default(),
            repair: RepairConfig::default(),
            knowledge: KnowledgeConfig::default(),
            web_search: WebSearchConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
