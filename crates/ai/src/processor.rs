//! Chat processing pipeline.
//!
//! [`ChatProcessor`] turns raw caller input into provider calls: resolve
//! the provider and model, validate, dispatch exactly once, verify the
//! returned content and shape the response. Conversation enrichment
//! happens before any of this, in the middleware layer.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;

use crate::{
    error::AiError,
    messages::{ChatConfig, ChatMessage, ChatRequest, ChatResponse, EmbeddingResponse, TokenUsage},
    provider::ProviderManager,
    request, response, token_counter,
};

pub struct ChatProcessor {
    manager: Arc<ProviderManager>,
}

impl ChatProcessor {
    pub fn new(manager: Arc<ProviderManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    /// Run a non-streaming chat completion.
    ///
    /// The response reports the model name the caller asked for, even when
    /// a configured rename sent a different name over the wire.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
        config: ChatConfig,
    ) -> crate::Result<ChatResponse> {
        let (chat_request, requested_model) = self.prepare(messages, user_id, provider, model, config)?;

        let request_id = request::generate_request_id();
        log::debug!("chat completion {request_id}: provider={provider} model={requested_model}");

        let client = self
            .manager
            .get_provider(provider)
            .ok_or_else(|| AiError::ProviderNotAvailable(provider.to_string()))?;

        let started = Instant::now();
        let completion = client.chat_completion(&chat_request).await?;

        if !response::validate_response_content(&completion.content) {
            log::warn!(
                "chat completion {request_id}: rejected response of {} chars",
                completion.content.chars().count()
            );
            return Err(AiError::InvalidResponseContent);
        }

        let usage = completion
            .usage
            .or_else(|| Some(estimate_usage(&chat_request.messages, &completion.content)));

        response::log_response_metrics(
            &request_id,
            provider,
            &requested_model,
            completion.content.chars().count(),
            started.elapsed(),
            usage,
        );

        Ok(response::chat_response(
            &request_id,
            completion.content,
            requested_model,
            usage,
            completion.finish_reason,
        ))
    }

    /// Run a streaming chat completion.
    ///
    /// Every chunk of the returned stream carries the same request id.
    /// Stream-level metrics are logged once the provider reports a finish
    /// reason.
    pub async fn chat_completion_stream(
        &self,
        messages: Vec<ChatMessage>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
        config: ChatConfig,
    ) -> crate::Result<crate::ChatStream> {
        let (chat_request, requested_model) = self.prepare(messages, user_id, provider, model, config)?;

        let client = self
            .manager
            .get_provider(provider)
            .ok_or_else(|| AiError::ProviderNotAvailable(provider.to_string()))?;

        if !client.supports_streaming() {
            return Err(AiError::StreamingNotSupported);
        }

        let request_id = request::generate_request_id();
        log::debug!("streaming completion {request_id}: provider={provider} model={requested_model}");

        let started = Instant::now();
        let inner = client.chat_completion_stream(&chat_request).await?;

        let provider_name = provider.to_string();
        let mut chunks: u64 = 0;
        let mut content_chars: usize = 0;

        let stream = inner.map(move |delta| {
            let delta = delta?;

            chunks += 1;
            content_chars += delta.content.chars().count();

            if delta.finish_reason.is_some() {
                response::log_streaming_metrics(
                    &request_id,
                    &provider_name,
                    &requested_model,
                    chunks,
                    content_chars,
                    started.elapsed(),
                );
            }

            Ok(response::stream_chunk(
                &request_id,
                delta.content,
                requested_model.clone(),
                delta.usage,
                delta.finish_reason,
            ))
        });

        Ok(Box::pin(stream))
    }

    /// Produce embeddings for a batch of texts, one vector per input text
    /// in the same order.
    pub async fn process_embeddings(
        &self,
        texts: Vec<String>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
    ) -> crate::Result<EmbeddingResponse> {
        let Some(provider_type) = self.manager.provider_type(provider) else {
            return Err(AiError::ProviderNotAvailable(provider.to_string()));
        };

        let requested_model = match model {
            Some(model) if !model.is_empty() => model,
            _ => self
                .manager
                .default_model(provider)
                .ok_or_else(|| AiError::NoDefaultModel(provider.to_string()))?,
        };

        let embedding_request = request::build_embedding_request(texts, provider_type.as_str(), requested_model.clone())?;

        let request_id = request::generate_request_id();
        log::debug!(
            "embeddings {request_id}: provider={provider} model={requested_model} texts={} user={user_id}",
            embedding_request.texts.len()
        );

        let client = self
            .manager
            .get_provider(provider)
            .ok_or_else(|| AiError::ProviderNotAvailable(provider.to_string()))?;

        let wire_model = self
            .manager
            .resolve_model(provider, &requested_model)
            .unwrap_or_else(|| requested_model.clone());

        let started = Instant::now();
        let mut embeddings = Vec::with_capacity(embedding_request.texts.len());

        for text in &embedding_request.texts {
            embeddings.push(client.embed(text, &wire_model).await?);
        }

        if !response::validate_embeddings(&embeddings) {
            return Err(AiError::InvalidResponseContent);
        }

        let usage = TokenUsage {
            input_tokens: token_counter::count_text_tokens(&embedding_request.texts),
            output_tokens: 0,
        };

        response::log_embedding_metrics(
            &request_id,
            provider,
            &requested_model,
            embeddings.len(),
            started.elapsed(),
            Some(usage),
        );

        Ok(response::embedding_response(
            &request_id,
            embeddings,
            requested_model,
            Some(usage),
        ))
    }

    /// Shared front half of both completion paths: availability, default
    /// model substitution, catalog check, input validation and rename
    /// resolution. Returns the wire-ready request plus the model name the
    /// caller asked for.
    fn prepare(
        &self,
        messages: Vec<ChatMessage>,
        user_id: &str,
        provider: &str,
        model: Option<String>,
        config: ChatConfig,
    ) -> crate::Result<(ChatRequest, String)> {
        // The registry name is free-form; the wire protocol follows the
        // entry's canonical provider type.
        let Some(provider_type) = self.manager.provider_type(provider) else {
            return Err(AiError::ProviderNotAvailable(provider.to_string()));
        };

        let requested_model = match model {
            Some(model) if !model.is_empty() => model,
            _ => self
                .manager
                .default_model(provider)
                .ok_or_else(|| AiError::NoDefaultModel(provider.to_string()))?,
        };

        if !self.manager.validate_provider_and_model(provider, &requested_model) {
            return Err(AiError::ModelNotAvailable {
                provider: provider.to_string(),
                model: requested_model,
            });
        }

        let wire_model = self
            .manager
            .resolve_model(provider, &requested_model)
            .unwrap_or_else(|| requested_model.clone());

        let chat_request = request::build_chat_request(messages, user_id, provider_type.as_str(), wire_model, config)?;

        Ok((chat_request, requested_model))
    }
}

/// Token usage estimate for providers that do not report it.
fn estimate_usage(messages: &[ChatMessage], content: &str) -> TokenUsage {
    TokenUsage {
        input_tokens: token_counter::count_input_tokens(messages),
        output_tokens: u32::try_from(content.chars().count() / 4).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::stream;
    use indoc::indoc;

    use super::*;
    use crate::{
        messages::FinishReason,
        provider::{Completion, CompletionDelta, CompletionStream, Provider},
    };

    fn manager_with_openai() -> Arc<ProviderManager> {
        let config: config::AiConfig = toml::from_str(indoc! {r#"
            [providers.openai]
            type = "openai"
            api_key = "sk-test"
        "#})
        .unwrap();

        Arc::new(ProviderManager::new(&config))
    }

    struct MockProvider {
        calls: AtomicUsize,
        content: String,
        streaming: bool,
    }

    impl MockProvider {
        fn returning(content: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                content: content.to_string(),
                streaming: false,
            }
        }

        fn streaming(content: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                content: content.to_string(),
                streaming: true,
            }
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        async fn chat_completion(&self, request: &ChatRequest) -> crate::Result<Completion> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            Ok(Completion {
                content: self.content.clone(),
                model: request.model.clone(),
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                }),
                finish_reason: Some(FinishReason::Stop),
            })
        }

        async fn chat_completion_stream(&self, _request: &ChatRequest) -> crate::Result<CompletionStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let deltas = vec![
                Ok(CompletionDelta {
                    content: self.content.clone(),
                    ..CompletionDelta::default()
                }),
                Ok(CompletionDelta {
                    finish_reason: Some(FinishReason::Stop),
                    ..CompletionDelta::default()
                }),
            ];

            Ok(Box::pin(stream::iter(deltas)))
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        async fn embed(&self, text: &str, _model: &str) -> crate::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32, 1.0])
        }

        fn name(&self) -> &str {
            "openai"
        }
    }

    #[tokio::test]
    async fn completion_calls_the_provider_exactly_once() {
        let manager = manager_with_openai();
        let mock = Arc::new(MockProvider::returning("Hello there."));
        manager.register_client("openai", mock.clone());

        let processor = ChatProcessor::new(manager);
        let response = processor
            .chat_completion(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "openai",
                Some("gpt-3.5-turbo".to_string()),
                ChatConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.content, "Hello there.");
        assert_eq!(response.model, "gpt-3.5-turbo");
        assert!(response.request_id.starts_with("req_"));
    }

    #[tokio::test]
    async fn missing_model_falls_back_to_the_default() {
        let manager = manager_with_openai();
        manager.register_client("openai", Arc::new(MockProvider::returning("ok")));

        let processor = ChatProcessor::new(manager);
        let response = processor
            .chat_completion(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "openai",
                None,
                ChatConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.model, "gpt-4o");
    }

    #[tokio::test]
    async fn custom_named_provider_completes_requests() {
        let config: config::AiConfig = toml::from_str(indoc! {r#"
            [providers.custom]
            type = "openai"
            api_key = "sk-test"
        "#})
        .unwrap();

        let manager = Arc::new(ProviderManager::new(&config));
        manager.register_client("custom", Arc::new(MockProvider::returning("ok")));

        // The registry name is not a canonical provider type; the request
        // must still go through using the entry's configured type.
        let processor = ChatProcessor::new(manager);
        let response = processor
            .chat_completion(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "custom",
                None,
                ChatConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(response.content, "ok");
        assert_eq!(response.model, "gpt-4o");
    }

    #[tokio::test]
    async fn unavailable_provider_is_rejected_up_front() {
        let manager = manager_with_openai();
        let processor = ChatProcessor::new(manager);

        let err = processor
            .chat_completion(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "anthropic",
                None,
                ChatConfig::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::ProviderNotAvailable(_)));
    }

    #[tokio::test]
    async fn unknown_model_is_rejected() {
        let manager = manager_with_openai();
        manager.register_client("openai", Arc::new(MockProvider::returning("ok")));

        let processor = ChatProcessor::new(manager);
        let err = processor
            .chat_completion(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "openai",
                Some("not-a-model".to_string()),
                ChatConfig::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::ModelNotAvailable { .. }));
    }

    #[tokio::test]
    async fn oversized_response_is_rejected() {
        let manager = manager_with_openai();
        let runaway = "a".repeat(response::MAX_RESPONSE_CONTENT_CHARS + 1);
        manager.register_client("openai", Arc::new(MockProvider::returning(&runaway)));

        let processor = ChatProcessor::new(manager);
        let err = processor
            .chat_completion(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "openai",
                None,
                ChatConfig::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::InvalidResponseContent));
    }

    #[tokio::test]
    async fn stream_chunks_share_one_request_id() {
        let manager = manager_with_openai();
        manager.register_client("openai", Arc::new(MockProvider::streaming("partial")));

        let processor = ChatProcessor::new(manager);
        let stream = processor
            .chat_completion_stream(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "openai",
                None,
                ChatConfig::default(),
            )
            .await
            .unwrap();

        let chunks: Vec<_> = stream.collect::<Vec<_>>().await;
        assert_eq!(chunks.len(), 2);

        let first = chunks[0].as_ref().unwrap();
        let second = chunks[1].as_ref().unwrap();
        assert_eq!(first.request_id, second.request_id);
        assert_eq!(first.content, "partial");
        assert_eq!(second.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn streaming_against_non_streaming_provider_fails() {
        let manager = manager_with_openai();
        manager.register_client("openai", Arc::new(MockProvider::returning("ok")));

        let processor = ChatProcessor::new(manager);
        let result = processor
            .chat_completion_stream(
                vec![ChatMessage::user("Hi")],
                "user-1",
                "openai",
                None,
                ChatConfig::default(),
            )
            .await;

        assert!(matches!(result, Err(AiError::StreamingNotSupported)));
    }

    #[tokio::test]
    async fn embeddings_stay_index_aligned() {
        let manager = manager_with_openai();
        manager.register_client("openai", Arc::new(MockProvider::returning("unused")));

        let processor = ChatProcessor::new(manager);
        let response = processor
            .process_embeddings(
                vec!["ab".to_string(), "abcd".to_string()],
                "user-1",
                "openai",
                Some("text-embedding-3-small".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(response.embeddings.len(), 2);
        assert_eq!(response.embeddings[0][0], 2.0);
        assert_eq!(response.embeddings[1][0], 4.0);
        assert!(response.usage.is_some());
    }
}
