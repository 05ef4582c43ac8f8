//! Static pricing tiers keyed by model-name prefix.
//!
//! Providers ship model families faster than we care to enumerate exact
//! names, so pricing matches on prefixes and the longest matching prefix
//! wins: "gpt-4-turbo-preview" lands in the gpt-4-turbo tier, not the
//! gpt-4 one.

use config::ProviderType;

/// Per-1K-token rates and context limit for one model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingTier {
    pub prefix: &'static str,
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub max_context_tokens: u32,
}

const OPENAI_TIERS: &[PricingTier] = &[
    PricingTier {
        prefix: "gpt-4-turbo",
        input_per_1k: 0.01,
        output_per_1k: 0.03,
        max_context_tokens: 128_000,
    },
    PricingTier {
        prefix: "gpt-4o",
        input_per_1k: 0.005,
        output_per_1k: 0.015,
        max_context_tokens: 128_000,
    },
    PricingTier {
        prefix: "gpt-4",
        input_per_1k: 0.03,
        output_per_1k: 0.06,
        max_context_tokens: 8_192,
    },
    PricingTier {
        prefix: "gpt-3.5-turbo",
        input_per_1k: 0.0015,
        output_per_1k: 0.002,
        max_context_tokens: 16_385,
    },
    PricingTier {
        prefix: "text-embedding-3-small",
        input_per_1k: 0.00002,
        output_per_1k: 0.0,
        max_context_tokens: 8_191,
    },
    PricingTier {
        prefix: "text-embedding-3-large",
        input_per_1k: 0.00013,
        output_per_1k: 0.0,
        max_context_tokens: 8_191,
    },
];

const ANTHROPIC_TIERS: &[PricingTier] = &[
    PricingTier {
        prefix: "claude-3-opus",
        input_per_1k: 0.015,
        output_per_1k: 0.075,
        max_context_tokens: 200_000,
    },
    PricingTier {
        prefix: "claude-3-5-sonnet",
        input_per_1k: 0.003,
        output_per_1k: 0.015,
        max_context_tokens: 200_000,
    },
    PricingTier {
        prefix: "claude-3-sonnet",
        input_per_1k: 0.003,
        output_per_1k: 0.015,
        max_context_tokens: 200_000,
    },
    PricingTier {
        prefix: "claude-3-haiku",
        input_per_1k: 0.00025,
        output_per_1k: 0.00125,
        max_context_tokens: 200_000,
    },
];

/// Generic fallback applied to unknown provider/model pairs.
///
/// Unknown models cost something rather than nothing: a zero estimate
/// would make spend ceilings a no-op for exactly the models nobody
/// audited.
pub const GENERIC_TIER: PricingTier = PricingTier {
    prefix: "",
    input_per_1k: 0.002,
    output_per_1k: 0.002,
    max_context_tokens: 8_192,
};

fn tiers(provider: ProviderType) -> &'static [PricingTier] {
    match provider {
        ProviderType::Openai => OPENAI_TIERS,
        ProviderType::Anthropic => ANTHROPIC_TIERS,
    }
}

/// Find the pricing tier for a model, longest matching prefix first.
pub fn tier_for(provider: ProviderType, model: &str) -> Option<&'static PricingTier> {
    tiers(provider)
        .iter()
        .filter(|tier| model.starts_with(tier.prefix))
        .max_by_key(|tier| tier.prefix.len())
}

/// Estimate the cost of a request in USD, 0.0 for unknown models.
pub fn cost_estimate(provider: ProviderType, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    match tier_for(provider, model) {
        Some(tier) => tier_cost(tier, input_tokens, output_tokens),
        None => 0.0,
    }
}

/// Cost of a token count pair at a given tier.
pub fn tier_cost(tier: &PricingTier, input_tokens: u32, output_tokens: u32) -> f64 {
    (f64::from(input_tokens) / 1000.0) * tier.input_per_1k + (f64::from(output_tokens) / 1000.0) * tier.output_per_1k
}
