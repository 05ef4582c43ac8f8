//! The assembled AI service.
//!
//! [`AiService`] composes the middleware layer with the chat processor.
//! Conversation enrichment always runs knowledge-base retrieval first and
//! tool advertisement second, so tool instructions land after any injected
//! context. Every collaborator is optional: without a retriever, tool
//! provider or cost tracker the service degrades to plain completions
//! rather than failing.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use config::AiConfig;
use futures::StreamExt;

use crate::{
    error::AiError,
    messages::{ChatConfig, ChatMessage, ChatResponse, EmbeddingResponse},
    middleware::{
        CostLimitCheck, CostLimits, CostMiddleware, CostRecord, CostSummary, CostTracker, DailyCost, ModelUsage,
        RagMiddleware, Retriever, ToolExecutionResult, ToolMiddleware, ToolProvider,
    },
    processor::ChatProcessor,
    provider::ProviderManager,
};

pub struct AiService {
    processor: ChatProcessor,
    manager: Arc<ProviderManager>,
    rag: Option<RagMiddleware>,
    tools: Option<ToolMiddleware>,
    cost: Arc<CostMiddleware>,
}

pub struct AiServiceBuilder {
    manager: Arc<ProviderManager>,
    retriever: Option<Arc<dyn Retriever>>,
    tool_provider: Option<Arc<dyn ToolProvider>>,
    cost_tracker: Option<Arc<dyn CostTracker>>,
}

impl AiServiceBuilder {
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn tool_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.tool_provider = Some(provider);
        self
    }

    pub fn cost_tracker(mut self, tracker: Arc<dyn CostTracker>) -> Self {
        self.cost_tracker = Some(tracker);
        self
    }

    pub fn build(self) -> AiService {
        let mut cost = CostMiddleware::new(self.cost_tracker);

        // Configured ceilings override the static table per provider.
        for name in self.manager.available_providers() {
            if let Some(limits) = self.manager.cost_limits(&name) {
                let defaults = cost.limits_for(&name);
                cost = cost.with_limits(
                    &name,
                    CostLimits {
                        daily: limits.daily.unwrap_or(defaults.daily),
                        monthly: limits.monthly.unwrap_or(defaults.monthly),
                    },
                );
            }
        }

        AiService {
            processor: ChatProcessor::new(Arc::clone(&self.manager)),
            manager: self.manager,
            rag: self.retriever.map(RagMiddleware::new),
            tools: self.tool_provider.map(ToolMiddleware::new),
            cost: Arc::new(cost),
        }
    }
}

impl AiService {
    pub fn builder(config: &AiConfig) -> AiServiceBuilder {
        AiServiceBuilder {
            manager: Arc::new(ProviderManager::new(config)),
            retriever: None,
            tool_provider: None,
            cost_tracker: None,
        }
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    /// Run the full chat pipeline: enrich the conversation, check spend
    /// ceilings, dispatch to the provider and record the actual cost.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
        config: ChatConfig,
    ) -> crate::Result<ChatResponse> {
        let result = self
            .chat_completion_inner(messages, user_id, provider, model, config)
            .await;

        if let Err(e) = &result {
            log::error!("Chat completion failed: {e}");
        }

        result
    }

    async fn chat_completion_inner(
        &self,
        messages: Vec<ChatMessage>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
        config: ChatConfig,
    ) -> crate::Result<ChatResponse> {
        let messages = self.apply_middleware(messages, user_id, &config).await;

        self.enforce_cost_ceiling(&messages, user_id, provider, model.as_deref())
            .await?;

        let response = self
            .processor
            .chat_completion(messages, user_id, provider, model, config)
            .await?;

        if let Some(usage) = response.usage {
            self.cost
                .track_cost(CostRecord {
                    user_id: user_id.to_string(),
                    provider: provider.to_string(),
                    model: response.model.clone(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                    cost: self
                        .cost
                        .estimate_cost(provider, &response.model, usage.input_tokens, usage.output_tokens),
                })
                .await;
        }

        Ok(response)
    }

    /// Run the chat pipeline as a stream. The streamed cost is estimated
    /// from accumulated content length and recorded once the provider
    /// reports a finish reason.
    pub async fn chat_completion_stream(
        &self,
        messages: Vec<ChatMessage>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
        config: ChatConfig,
    ) -> crate::Result<crate::ChatStream> {
        let messages = self.apply_middleware(messages, user_id, &config).await;

        self.enforce_cost_ceiling(&messages, user_id, provider, model.as_deref())
            .await?;

        let stream = match self
            .processor
            .chat_completion_stream(messages, user_id, provider, model, config)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Chat completion failed: {e}");
                return Err(e);
            }
        };

        let cost = Arc::clone(&self.cost);
        let content_chars = Arc::new(AtomicUsize::new(0));
        let user_id = user_id.to_string();
        let provider = provider.to_string();

        let stream = stream.then(move |chunk| {
            let cost = Arc::clone(&cost);
            let content_chars = Arc::clone(&content_chars);
            let user_id = user_id.clone();
            let provider = provider.clone();

            async move {
                if let Ok(chunk) = &chunk {
                    content_chars.fetch_add(chunk.content.chars().count(), Ordering::Relaxed);

                    if chunk.finish_reason.is_some() {
                        cost.track_streaming_cost(
                            &user_id,
                            &provider,
                            &chunk.model,
                            content_chars.load(Ordering::Relaxed),
                        )
                        .await;
                    }
                }

                chunk
            }
        });

        Ok(Box::pin(stream))
    }

    /// Produce embeddings and record their cost.
    pub async fn get_embeddings(
        &self,
        texts: Vec<String>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
    ) -> crate::Result<EmbeddingResponse> {
        let result = self
            .processor
            .process_embeddings(texts, user_id, provider, model)
            .await;

        match result {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    self.cost
                        .track_cost(CostRecord {
                            user_id: user_id.to_string(),
                            provider: provider.to_string(),
                            model: response.model.clone(),
                            input_tokens: usage.input_tokens,
                            output_tokens: 0,
                            cost: self.cost.estimate_cost(provider, &response.model, usage.input_tokens, 0),
                        })
                        .await;
                }

                Ok(response)
            }
            Err(e) => {
                log::error!("Embedding generation failed: {e}");
                Err(e)
            }
        }
    }

    /// Execute any tool calls embedded in an assistant response. Without a
    /// tool provider there is nothing to execute.
    pub async fn execute_tools(&self, ai_response: &str, user_id: &str) -> Vec<ToolExecutionResult> {
        match &self.tools {
            Some(tools) => tools.execute_tools_from_response(ai_response, user_id).await,
            None => Vec::new(),
        }
    }

    pub async fn check_cost_limits(&self, user_id: &str, provider: &str, estimated_cost: f64) -> CostLimitCheck {
        self.cost.check_cost_limits(user_id, provider, estimated_cost).await
    }

    pub fn cost_limits(&self, provider: &str) -> CostLimits {
        self.cost.limits_for(provider)
    }

    pub async fn cost_summary(&self, user_id: &str, days: u32) -> CostSummary {
        self.cost.cost_summary(user_id, days).await
    }

    pub async fn daily_costs(&self, user_id: &str, days: u32) -> Vec<DailyCost> {
        self.cost.daily_costs(user_id, days).await
    }

    pub async fn model_usage_stats(&self, user_id: &str, days: u32) -> Vec<ModelUsage> {
        self.cost.model_usage_stats(user_id, days).await
    }

    /// Enrich the conversation: retrieval context first, tool
    /// advertisement second. Both passes are best-effort and leave the
    /// conversation untouched on failure.
    async fn apply_middleware(&self, messages: Vec<ChatMessage>, user_id: &str, config: &ChatConfig) -> Vec<ChatMessage> {
        let messages = match &self.rag {
            Some(rag) if RagMiddleware::should_apply_rag(&messages, config.use_knowledge_base) => {
                rag.process(messages, user_id, config.max_context_chunks).await
            }
            _ => messages,
        };

        match &self.tools {
            Some(tools) => tools.process(messages, config.use_tools).await,
            None => messages,
        }
    }

    /// Reject the request up front when its estimated cost would push the
    /// user past the daily ceiling.
    async fn enforce_cost_ceiling(
        &self,
        messages: &[ChatMessage],
        user_id: &str,
        provider: &str,
        model: Option<&str>,
    ) -> crate::Result<()> {
        let model = match model {
            Some(model) if !model.is_empty() => model.to_string(),
            _ => self.manager.default_model(provider).unwrap_or_default(),
        };

        let input_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let input_tokens = u32::try_from(input_chars / 4).unwrap_or(u32::MAX);
        let output_tokens = input_tokens;

        let estimated = self.cost.estimate_cost(provider, &model, input_tokens, output_tokens);
        let check = self.cost.check_cost_limits(user_id, provider, estimated).await;

        if !check.within_limits {
            return Err(AiError::CostLimitExceeded {
                current_daily_cost: check.current_daily_cost,
                daily_limit: check.daily_limit,
            });
        }

        Ok(())
    }
}
