//! AI configuration structures for model providers.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// AI service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AiConfig {
    /// Whether the AI endpoints are enabled.
    enabled: bool,

    /// The path where the AI endpoints will be mounted.
    pub path: Cow<'static, str>,

    /// Map of provider configurations, keyed by provider name.
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: Cow::Borrowed("/ai"),
            providers: BTreeMap::new(),
        }
    }
}

impl AiConfig {
    /// Whether the AI endpoints are enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Whether there are any providers with a usable API key.
    pub fn has_providers(&self) -> bool {
        self.providers.values().any(|p| p.has_api_key())
    }

    /// Register providers whose credentials are present in the environment
    /// but which have no explicit configuration block.
    ///
    /// This keeps a bare `pylon` invocation useful: exporting
    /// `OPENAI_API_KEY` or `ANTHROPIC_API_KEY` is enough to get a working
    /// provider with its stock model catalog. Explicit configuration always
    /// wins over discovery.
    pub fn discover_env_providers(&mut self) {
        for (name, provider_type, var) in [
            ("openai", ProviderType::Openai, "OPENAI_API_KEY"),
            ("anthropic", ProviderType::Anthropic, "ANTHROPIC_API_KEY"),
        ] {
            if self.providers.contains_key(name) {
                continue;
            }

            let Ok(key) = std::env::var(var) else {
                continue;
            };

            if key.is_empty() {
                continue;
            }

            log::debug!("discovered {name} provider credentials from {var}");

            self.providers.insert(
                name.to_string(),
                ProviderConfig {
                    provider_type,
                    api_key: Some(SecretString::from(key)),
                    base_url: None,
                    default_model: None,
                    models: BTreeMap::new(),
                    limits: None,
                },
            );
        }
    }
}

/// Provider type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// OpenAI provider.
    Openai,
    /// Anthropic provider.
    Anthropic,
}

impl ProviderType {
    /// Canonical lowercase name of this provider type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::Openai),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!("unknown provider type: {other}")),
        }
    }
}

/// Configuration for a single AI provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// The provider type.
    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    /// API key for the provider. A missing or empty key means the provider
    /// is skipped at registration time, not an error.
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Custom base URL overriding the provider default.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model substituted when a request does not name one.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Map of model configurations, keyed by model ID.
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,

    /// Spend ceilings for this provider.
    #[serde(default)]
    pub limits: Option<CostLimitsConfig>,
}

impl ProviderConfig {
    /// Whether this provider has a non-empty API key.
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|key| !key.expose_secret().is_empty())
    }
}

/// Configuration for an individual model within a provider.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Optional rename - the actual provider model name.
    /// If not specified, the model ID (map key) is used.
    #[serde(default)]
    pub rename: Option<String>,

    /// Pricing override for this model.
    #[serde(default)]
    pub pricing: Option<ModelPricing>,
}

/// Per-1K-token pricing and context limits for a model tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelPricing {
    /// USD per 1000 input tokens.
    pub input_per_1k: f64,
    /// USD per 1000 output tokens.
    pub output_per_1k: f64,
    /// Maximum context window in tokens.
    pub max_context_tokens: u32,
}

/// Daily and monthly spend ceilings in USD.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CostLimitsConfig {
    /// Maximum spend per calendar day.
    #[serde(default)]
    pub daily: Option<f64>,
    /// Maximum spend per calendar month.
    #[serde(default)]
    pub monthly: Option<f64>,
}
