pub(crate) mod anthropic;
mod manager;
pub(crate) mod openai;
pub mod pricing;

pub use manager::{ProviderManager, ProviderStatus};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::messages::{ChatRequest, FinishReason, TokenUsage};

/// A normalized completion result from any provider.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<FinishReason>,
}

/// One normalized delta of a streaming completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionDelta {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<FinishReason>,
}

/// Type alias for a stream of completion deltas.
///
/// The stream is pinned and boxed to allow for dynamic dispatch across
/// different provider implementations.
pub type CompletionStream = Pin<Box<dyn Stream<Item = crate::Result<CompletionDelta>> + Send>>;

/// Trait for LLM provider implementations.
///
/// Note for async_trait: the trait has to be dyn-compatible, so plain
/// async trait functions without Box/Pin are not an option.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Process a chat completion request. Implementations never stream
    /// here; the request is sent with streaming disabled.
    async fn chat_completion(&self, request: &ChatRequest) -> crate::Result<Completion>;

    /// Process a streaming chat completion request.
    ///
    /// Returns a stream of deltas that are sent incrementally as the model
    /// generates the response. Each delta's content should be concatenated
    /// to build the complete message.
    async fn chat_completion_stream(&self, _request: &ChatRequest) -> crate::Result<CompletionStream> {
        // Default implementation for providers that don't support streaming
        Err(crate::error::AiError::StreamingNotSupported)
    }

    /// Check if this provider supports streaming completions.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Produce an embedding vector for one text.
    async fn embed(&self, text: &str, model: &str) -> crate::Result<Vec<f32>>;

    /// Get the provider name.
    fn name(&self) -> &str;
}
