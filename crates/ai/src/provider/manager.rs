use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use config::{AiConfig, ModelPricing, ProviderConfig, ProviderType};
use serde::Serialize;

use crate::provider::{Provider, anthropic::AnthropicProvider, openai::OpenAIProvider, pricing};

const OPENAI_STOCK_MODELS: &[&str] = &[
    "gpt-4",
    "gpt-4-turbo",
    "gpt-4o",
    "gpt-3.5-turbo",
    "text-embedding-3-small",
    "text-embedding-3-large",
];

const ANTHROPIC_STOCK_MODELS: &[&str] = &[
    "claude-3-opus-20240229",
    "claude-3-5-sonnet-20240620",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

fn stock_models(provider_type: ProviderType) -> &'static [&'static str] {
    match provider_type {
        ProviderType::Openai => OPENAI_STOCK_MODELS,
        ProviderType::Anthropic => ANTHROPIC_STOCK_MODELS,
    }
}

fn stock_default_model(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::Openai => "gpt-4o",
        ProviderType::Anthropic => "claude-3-5-sonnet-20240620",
    }
}

/// Static metadata and pricing for one model of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub provider: String,
    pub provider_type: ProviderType,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub max_context_tokens: u32,
}

/// Point-in-time snapshot of one registered provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    /// A usable configuration (with credentials) exists.
    pub available: bool,
    /// A client has already been constructed and cached.
    pub initialized: bool,
    pub default_model: String,
    pub model_count: usize,
}

struct ProviderEntry {
    config: ProviderConfig,
    models: Vec<String>,
    default_model: String,
}

/// Registry of configured providers and their lazily constructed clients.
///
/// Only providers with a present, non-empty API key are registered;
/// absent credentials skip the provider silently. Clients are built on
/// first use through a get-or-create path holding the cache lock, so two
/// racing callers can never construct two clients for one provider.
pub struct ProviderManager {
    entries: BTreeMap<String, ProviderEntry>,
    clients: Mutex<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderManager {
    pub fn new(config: &AiConfig) -> Self {
        let mut entries = BTreeMap::new();

        for (name, provider_config) in &config.providers {
            if !provider_config.has_api_key() {
                log::debug!("provider '{name}' has no API key, skipping registration");
                continue;
            }

            let models: Vec<String> = if provider_config.models.is_empty() {
                stock_models(provider_config.provider_type)
                    .iter()
                    .map(|m| (*m).to_string())
                    .collect()
            } else {
                provider_config.models.keys().cloned().collect()
            };

            let default_model = provider_config
                .default_model
                .clone()
                .or_else(|| {
                    let stock = stock_default_model(provider_config.provider_type);
                    models.iter().find(|m| *m == stock).cloned()
                })
                .or_else(|| models.first().cloned())
                .unwrap_or_else(|| stock_default_model(provider_config.provider_type).to_string());

            log::debug!(
                "registered provider '{name}' ({}) with {} models, default '{default_model}'",
                provider_config.provider_type,
                models.len()
            );

            entries.insert(
                name.clone(),
                ProviderEntry {
                    config: provider_config.clone(),
                    models,
                    default_model,
                },
            );
        }

        Self {
            entries,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn Provider>>> {
        match self.clients.lock() {
            Ok(guard) => guard,
            // A poisoned cache still holds valid Arc clients.
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get or lazily construct the client for a provider.
    ///
    /// Returns `None` if the provider was never registered or if client
    /// construction fails; construction errors are logged, not raised.
    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn Provider>> {
        let mut clients = self.clients();

        if let Some(client) = clients.get(name) {
            return Some(Arc::clone(client));
        }

        let entry = self.entries.get(name)?;

        match build_client(name, &entry.config) {
            Ok(client) => {
                clients.insert(name.to_string(), Arc::clone(&client));
                Some(client)
            }
            Err(e) => {
                log::error!("failed to construct client for provider '{name}': {e}");
                None
            }
        }
    }

    pub fn is_provider_available(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The canonical provider type behind a registered name. Providers may
    /// be registered under any configuration key, so the name alone says
    /// nothing about the wire protocol.
    pub fn provider_type(&self, name: &str) -> Option<ProviderType> {
        self.entries.get(name).map(|entry| entry.config.provider_type)
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn available_models(&self, name: &str) -> Vec<String> {
        self.entries.get(name).map(|entry| entry.models.clone()).unwrap_or_default()
    }

    pub fn default_model(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|entry| entry.default_model.clone())
    }

    /// True iff the provider is registered and the model is in its
    /// available-models list.
    pub fn validate_provider_and_model(&self, name: &str, model: &str) -> bool {
        self.resolve_model(name, model).is_some()
    }

    /// Resolve a requested model to the name the provider expects,
    /// honoring configured renames. `None` if the model is not in the
    /// provider's catalog.
    pub fn resolve_model(&self, name: &str, requested_model: &str) -> Option<String> {
        let entry = self.entries.get(name)?;

        if !entry.models.iter().any(|m| m == requested_model) {
            return None;
        }

        let resolved = entry
            .config
            .models
            .get(requested_model)
            .and_then(|m| m.rename.as_deref())
            .unwrap_or(requested_model);

        Some(resolved.to_string())
    }

    /// Merged static metadata and pricing for one model. `None` if the
    /// model is not in the provider's catalog.
    pub fn model_info(&self, name: &str, model: &str) -> Option<ModelInfo> {
        let entry = self.entries.get(name)?;

        if !entry.models.iter().any(|m| m == model) {
            return None;
        }

        // A configured pricing override beats the prefix-matched tier.
        let configured: Option<ModelPricing> = entry.config.models.get(model).and_then(|m| m.pricing);

        let (input_per_1k, output_per_1k, max_context_tokens) = match configured {
            Some(p) => (p.input_per_1k, p.output_per_1k, p.max_context_tokens),
            None => {
                let tier = pricing::tier_for(entry.config.provider_type, model).unwrap_or(&pricing::GENERIC_TIER);
                (tier.input_per_1k, tier.output_per_1k, tier.max_context_tokens)
            }
        };

        Some(ModelInfo {
            name: model.to_string(),
            provider: name.to_string(),
            provider_type: entry.config.provider_type,
            input_per_1k,
            output_per_1k,
            max_context_tokens,
        })
    }

    /// Estimated cost in USD for a token count pair, 0.0 for unknown
    /// models.
    pub fn cost_estimate(&self, name: &str, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let Some(entry) = self.entries.get(name) else {
            return 0.0;
        };

        pricing::cost_estimate(entry.config.provider_type, model, input_tokens, output_tokens)
    }

    /// Per-provider snapshot for the status endpoint.
    pub fn provider_status(&self) -> BTreeMap<String, ProviderStatus> {
        let clients = self.clients();

        self.entries
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    ProviderStatus {
                        available: true,
                        initialized: clients.contains_key(name),
                        default_model: entry.default_model.clone(),
                        model_count: entry.models.len(),
                    },
                )
            })
            .collect()
    }

    /// Spend ceilings configured for a provider, if any.
    pub fn cost_limits(&self, name: &str) -> Option<config::CostLimitsConfig> {
        self.entries.get(name).and_then(|entry| entry.config.limits)
    }

    /// Inject a pre-built client, bypassing construction. Tests use this
    /// to stand in mock providers.
    #[cfg(test)]
    pub(crate) fn register_client(&self, name: &str, client: Arc<dyn Provider>) {
        self.clients().insert(name.to_string(), client);
    }
}

fn build_client(name: &str, config: &ProviderConfig) -> crate::Result<Arc<dyn Provider>> {
    let client: Arc<dyn Provider> = match config.provider_type {
        ProviderType::Openai => Arc::new(OpenAIProvider::new(name.to_string(), config)?),
        ProviderType::Anthropic => Arc::new(AnthropicProvider::new(name.to_string(), config)?),
    };

    Ok(client)
}
