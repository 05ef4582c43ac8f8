//! Cost estimation, spend ceilings and usage tracking.
//!
//! Persistence is an injected [`CostTracker`]; the middleware only
//! computes. Tracking is best-effort: a failing tracker is logged and
//! must never break a chat response, and a missing tracker reports zero
//! spend and never blocks.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use config::ProviderType;
use serde::Serialize;

use crate::provider::pricing::{self, GENERIC_TIER};

/// Per-provider spend ceilings in USD.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostLimits {
    pub daily: f64,
    pub monthly: f64,
}

/// Static default ceilings applied when configuration does not override
/// them.
fn default_limits(provider: &str) -> CostLimits {
    match provider {
        "openai" | "anthropic" => CostLimits {
            daily: 50.0,
            monthly: 1000.0,
        },
        _ => CostLimits {
            daily: 10.0,
            monthly: 200.0,
        },
    }
}

/// One request's cost figures, handed to the tracker for persistence.
#[derive(Debug, Clone, Serialize)]
pub struct CostRecord {
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
}

/// Aggregated spend over a window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostSummary {
    pub total_cost: f64,
    pub total_requests: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}

/// Spend for one calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct DailyCost {
    pub date: String,
    pub cost: f64,
}

/// Usage aggregated per provider/model pair.
#[derive(Debug, Clone, Serialize)]
pub struct ModelUsage {
    pub provider: String,
    pub model: String,
    pub requests: u64,
    pub cost: f64,
}

/// External persistence store for cost records.
#[async_trait]
pub trait CostTracker: Send + Sync {
    async fn record(&self, record: CostRecord) -> anyhow::Result<()>;

    /// Total spend for the current calendar day.
    async fn daily_spend(&self, user_id: &str) -> anyhow::Result<f64>;

    async fn cost_summary(&self, user_id: &str, days: u32) -> anyhow::Result<CostSummary>;

    async fn daily_costs(&self, user_id: &str, days: u32) -> anyhow::Result<Vec<DailyCost>>;

    async fn model_usage_stats(&self, user_id: &str, days: u32) -> anyhow::Result<Vec<ModelUsage>>;
}

/// Result of a pre-request spend check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostLimitCheck {
    pub within_limits: bool,
    pub current_daily_cost: f64,
    pub daily_limit: f64,
    pub would_exceed_daily: bool,
}

pub struct CostMiddleware {
    tracker: Option<Arc<dyn CostTracker>>,
    limit_overrides: BTreeMap<String, CostLimits>,
}

impl CostMiddleware {
    pub fn new(tracker: Option<Arc<dyn CostTracker>>) -> Self {
        Self {
            tracker,
            limit_overrides: BTreeMap::new(),
        }
    }

    /// Override the static ceilings for one provider.
    pub fn with_limits(mut self, provider: &str, limits: CostLimits) -> Self {
        self.limit_overrides.insert(provider.to_string(), limits);
        self
    }

    /// Effective spend ceilings for a provider.
    pub fn limits_for(&self, provider: &str) -> CostLimits {
        self.limit_overrides
            .get(provider)
            .copied()
            .unwrap_or_else(|| default_limits(provider))
    }

    /// Estimate the cost of a request in USD.
    ///
    /// Unknown provider/model pairs fall back to a generic tier rather
    /// than zero: a free-looking unknown model would bypass every ceiling.
    pub fn estimate_cost(&self, provider: &str, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let tier = provider
            .parse::<ProviderType>()
            .ok()
            .and_then(|provider_type| pricing::tier_for(provider_type, model))
            .unwrap_or(&GENERIC_TIER);

        pricing::tier_cost(tier, input_tokens, output_tokens)
    }

    /// Estimate a streaming request's cost from its content length,
    /// approximating tokens on both sides as length/4.
    pub fn estimate_streaming_cost(&self, provider: &str, model: &str, content_length: usize) -> f64 {
        let tokens = Self::token_count_for_length(content_length);
        self.estimate_cost(provider, model, tokens, tokens)
    }

    /// Crude token estimate shared across the middleware: one token per
    /// four characters.
    pub fn calculate_token_count(text: &str) -> u32 {
        Self::token_count_for_length(text.chars().count())
    }

    fn token_count_for_length(chars: usize) -> u32 {
        u32::try_from(chars / 4).unwrap_or(u32::MAX)
    }

    /// Check whether an estimated cost fits under the user's daily
    /// ceiling. Without a tracker the current spend reads as zero and the
    /// check never blocks.
    pub async fn check_cost_limits(&self, user_id: &str, provider: &str, estimated_cost: f64) -> CostLimitCheck {
        let limits = self.limits_for(provider);

        let current_daily_cost = match &self.tracker {
            Some(tracker) => match tracker.daily_spend(user_id).await {
                Ok(spend) => spend,
                Err(e) => {
                    log::warn!("cost tracker failed to report daily spend, assuming zero: {e}");
                    0.0
                }
            },
            None => 0.0,
        };

        let would_exceed_daily = current_daily_cost + estimated_cost > limits.daily;

        CostLimitCheck {
            within_limits: !would_exceed_daily,
            current_daily_cost,
            daily_limit: limits.daily,
            would_exceed_daily,
        }
    }

    /// Persist one request's cost figures, best-effort.
    pub async fn track_cost(&self, record: CostRecord) {
        let Some(tracker) = &self.tracker else {
            return;
        };

        if let Err(e) = tracker.record(record).await {
            log::warn!("failed to track request cost: {e}");
        }
    }

    /// Persist streaming cost figures estimated from content length.
    pub async fn track_streaming_cost(&self, user_id: &str, provider: &str, model: &str, content_length: usize) {
        let tokens = Self::token_count_for_length(content_length);

        let record = CostRecord {
            user_id: user_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            input_tokens: tokens,
            output_tokens: tokens,
            cost: self.estimate_streaming_cost(provider, model, content_length),
        };

        self.track_cost(record).await;
    }

    pub async fn cost_summary(&self, user_id: &str, days: u32) -> CostSummary {
        match &self.tracker {
            Some(tracker) => tracker.cost_summary(user_id, days).await.unwrap_or_else(|e| {
                log::warn!("cost tracker failed to aggregate summary: {e}");
                CostSummary::default()
            }),
            None => CostSummary::default(),
        }
    }

    pub async fn daily_costs(&self, user_id: &str, days: u32) -> Vec<DailyCost> {
        match &self.tracker {
            Some(tracker) => tracker.daily_costs(user_id, days).await.unwrap_or_else(|e| {
                log::warn!("cost tracker failed to list daily costs: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    pub async fn model_usage_stats(&self, user_id: &str, days: u32) -> Vec<ModelUsage> {
        match &self.tracker {
            Some(tracker) => tracker.model_usage_stats(user_id, days).await.unwrap_or_else(|e| {
                log::warn!("cost tracker failed to aggregate model usage: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FixedSpendTracker {
        daily: f64,
        records: Mutex<Vec<CostRecord>>,
    }

    impl FixedSpendTracker {
        fn new(daily: f64) -> Self {
            Self {
                daily,
                records: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CostTracker for FixedSpendTracker {
        async fn record(&self, record: CostRecord) -> anyhow::Result<()> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }

        async fn daily_spend(&self, _user_id: &str) -> anyhow::Result<f64> {
            Ok(self.daily)
        }

        async fn cost_summary(&self, _user_id: &str, _days: u32) -> anyhow::Result<CostSummary> {
            Ok(CostSummary {
                total_cost: self.daily,
                total_requests: 3,
                ..CostSummary::default()
            })
        }

        async fn daily_costs(&self, _user_id: &str, _days: u32) -> anyhow::Result<Vec<DailyCost>> {
            Ok(vec![])
        }

        async fn model_usage_stats(&self, _user_id: &str, _days: u32) -> anyhow::Result<Vec<ModelUsage>> {
            Ok(vec![])
        }
    }

    struct BrokenTracker;

    #[async_trait]
    impl CostTracker for BrokenTracker {
        async fn record(&self, _record: CostRecord) -> anyhow::Result<()> {
            anyhow::bail!("database offline")
        }

        async fn daily_spend(&self, _user_id: &str) -> anyhow::Result<f64> {
            anyhow::bail!("database offline")
        }

        async fn cost_summary(&self, _user_id: &str, _days: u32) -> anyhow::Result<CostSummary> {
            anyhow::bail!("database offline")
        }

        async fn daily_costs(&self, _user_id: &str, _days: u32) -> anyhow::Result<Vec<DailyCost>> {
            anyhow::bail!("database offline")
        }

        async fn model_usage_stats(&self, _user_id: &str, _days: u32) -> anyhow::Result<Vec<ModelUsage>> {
            anyhow::bail!("database offline")
        }
    }

    #[test]
    fn gpt4_estimate_matches_the_tier() {
        let middleware = CostMiddleware::new(None);

        let cost = middleware.estimate_cost("openai", "gpt-4", 1000, 500);
        assert!((cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_the_generic_fallback() {
        let middleware = CostMiddleware::new(None);

        let cost = middleware.estimate_cost("openai", "unknown-model", 100, 50);
        assert!(cost > 0.0);

        let cost = middleware.estimate_cost("nonsense-provider", "whatever", 100, 50);
        assert!(cost > 0.0);
    }

    #[test]
    fn streaming_estimate_uses_quarter_length_tokens() {
        let middleware = CostMiddleware::new(None);

        // 4000 chars -> 1000 tokens each side at gpt-4 rates
        let cost = middleware.estimate_streaming_cost("openai", "gpt-4", 4000);
        assert!((cost - 0.09).abs() < 1e-9);
    }

    #[test]
    fn token_count_is_length_over_four() {
        assert_eq!(CostMiddleware::calculate_token_count(""), 0);
        assert_eq!(CostMiddleware::calculate_token_count("abcd"), 1);
        assert_eq!(CostMiddleware::calculate_token_count(&"a".repeat(403)), 100);
    }

    #[tokio::test]
    async fn no_tracker_never_blocks() {
        let middleware = CostMiddleware::new(None);

        let check = middleware.check_cost_limits("user-1", "openai", 1e6).await;
        assert_eq!(check.current_daily_cost, 0.0);
        // The estimate alone can still exceed the ceiling.
        assert!(check.would_exceed_daily);

        let check = middleware.check_cost_limits("user-1", "openai", 0.01).await;
        assert!(check.within_limits);
    }

    #[tokio::test]
    async fn daily_ceiling_blocks_when_spend_is_high() {
        let middleware = CostMiddleware::new(Some(Arc::new(FixedSpendTracker::new(49.99))));

        let check = middleware.check_cost_limits("user-1", "openai", 0.05).await;
        assert!(!check.within_limits);
        assert!(check.would_exceed_daily);
        assert_eq!(check.daily_limit, 50.0);
        assert!((check.current_daily_cost - 49.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn limit_overrides_replace_the_static_table() {
        let middleware = CostMiddleware::new(Some(Arc::new(FixedSpendTracker::new(5.0)))).with_limits(
            "openai",
            CostLimits {
                daily: 4.0,
                monthly: 50.0,
            },
        );

        let check = middleware.check_cost_limits("user-1", "openai", 0.01).await;
        assert!(!check.within_limits);
        assert_eq!(check.daily_limit, 4.0);
    }

    #[tokio::test]
    async fn broken_tracker_degrades_to_zero_spend() {
        let middleware = CostMiddleware::new(Some(Arc::new(BrokenTracker)));

        let check = middleware.check_cost_limits("user-1", "openai", 0.01).await;
        assert!(check.within_limits);
        assert_eq!(check.current_daily_cost, 0.0);

        // Tracking failures never surface.
        middleware
            .track_cost(CostRecord {
                user_id: "user-1".into(),
                provider: "openai".into(),
                model: "gpt-4".into(),
                input_tokens: 1,
                output_tokens: 1,
                cost: 0.0001,
            })
            .await;

        assert_eq!(middleware.cost_summary("user-1", 7).await.total_requests, 0);
        assert!(middleware.daily_costs("user-1", 7).await.is_empty());
    }

    #[tokio::test]
    async fn streaming_costs_are_recorded() {
        let tracker = Arc::new(FixedSpendTracker::new(0.0));
        let middleware = CostMiddleware::new(Some(tracker.clone()));

        middleware
            .track_streaming_cost("user-1", "openai", "gpt-4", 4000)
            .await;

        let records = tracker.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input_tokens, 1000);
        assert!((records[0].cost - 0.09).abs() < 1e-9);
    }
}
