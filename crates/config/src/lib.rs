//! Pylon configuration structures to map the pylon.toml configuration.

#![deny(missing_docs)]

mod ai;
mod loader;

use std::{net::SocketAddr, path::Path};

use serde::Deserialize;

pub use ai::{
    AiConfig, CostLimitsConfig, ModelConfig, ModelPricing, ProviderConfig, ProviderType,
};

/// Main configuration structure for the Pylon application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// AI service configuration settings.
    #[serde(default)]
    pub ai: AiConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration has at least one usable provider.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.ai.has_providers() {
            anyhow::bail!(
                "no AI providers configured: add a [ai.providers.*] block or export a provider API key"
            );
        }

        Ok(())
    }
}

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
}
