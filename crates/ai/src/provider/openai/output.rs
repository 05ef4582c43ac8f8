use serde::Deserialize;

use crate::{
    messages::{FinishReason, TokenUsage},
    provider::{Completion, CompletionDelta},
};

/// Response from the OpenAI chat completions API.
#[derive(Debug, Deserialize)]
pub(super) struct OpenAIResponse {
    pub model: String,
    pub choices: Vec<OpenAIChoice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIChoice {
    pub message: OpenAIResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(super) struct OpenAIUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl From<OpenAIUsage> for TokenUsage {
    fn from(usage: OpenAIUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

impl From<OpenAIResponse> for Completion {
    fn from(mut response: OpenAIResponse) -> Self {
        let choice = if response.choices.is_empty() {
            None
        } else {
            Some(response.choices.swap_remove(0))
        };

        let (content, finish_reason) = match choice {
            Some(choice) => (choice.message.content.unwrap_or_default(), choice.finish_reason),
            None => (String::new(), None),
        };

        Self {
            content,
            model: response.model,
            usage: response.usage.map(Into::into),
            finish_reason,
        }
    }
}

/// One SSE chunk of an OpenAI streaming response.
#[derive(Debug, Deserialize)]
pub(super) struct OpenAIStreamChunk {
    #[serde(default)]
    pub choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIStreamChoice {
    #[serde(default)]
    pub delta: OpenAIDelta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct OpenAIDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl OpenAIStreamChunk {
    pub fn into_delta(mut self) -> CompletionDelta {
        let choice = if self.choices.is_empty() {
            None
        } else {
            Some(self.choices.swap_remove(0))
        };

        let (content, finish_reason) = match choice {
            Some(choice) => (choice.delta.content.unwrap_or_default(), choice.finish_reason),
            None => (String::new(), None),
        };

        CompletionDelta {
            content,
            usage: self.usage.map(Into::into),
            finish_reason,
        }
    }
}

/// Response from the OpenAI embeddings API.
#[derive(Debug, Deserialize)]
pub(super) struct OpenAIEmbeddingResponse {
    pub data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OpenAIEmbeddingData {
    pub embedding: Vec<f32>,
}
