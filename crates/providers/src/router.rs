//! Provider router — selects the model provider based on config.

use std::collections::HashMap;
use std::sync::Arc;
use quarry_core::provider::Provider;
use crate::openai_compat::OpenAiCompatProvider;

/// Routes model requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Resolve a model string to a provider and the model id to send.
    ///
    /// `"groq:llama-3.1-70b"` routes to the registered `groq` provider;
    /// anything else goes to the default provider unchanged.
    pub fn resolve(&self, model: &str) -> Option<(Arc<dyn Provider>, String)> {
        if let Some((prefix, rest)) = model.split_once(':')
            && let Some(provider) = self.get(prefix)
        {
            return Some((provider, rest.to_string()));
        }
        self.default().map(|p| (p, model.to_string()))
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &quarry_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));

        router.register(
            name.clone(),
            Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key)),
        );
    }

    // The default provider exists even if not explicitly configured
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = default_base_url(&config.default_provider);
        router.register(
            config.default_provider.clone(),
            Arc::new(OpenAiCompatProvider::new(
                &config.default_provider,
                &base_url,
                &api_key,
            )),
        );
    }

    router
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_register_and_lookup() {
        let mut router = ProviderRouter::new("openrouter");
        router.register("openrouter", Arc::new(OpenAiCompatProvider::openrouter("sk-test")));

        assert!(router.get("openrouter").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
    }

    #[test]
    fn resolve_prefixed_model() {
        let mut router = ProviderRouter::new("openai");
        router.register("openai", Arc::new(OpenAiCompatProvider::openai("sk-test")));
        router.register("ollama", Arc::new(OpenAiCompatProvider::ollama(None)));

        let (provider, model) = router.resolve("ollama:llama3").unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(model, "llama3");

        let (provider, model) = router.resolve("gpt-4o-mini").unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(model, "gpt-4o-mini");

        // Unknown prefix: the whole string is the model id
        let (_, model) = router.resolve("meta:llama").unwrap();
        assert_eq!(model, "meta:llama");
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn build_from_default_config() {
        let config = quarry_config::AppConfig::default();
        let router = build_from_config(&config);
        assert!(router.default().is_some());
        assert_eq!(router.list(), vec!["openai"]);
    }
}
