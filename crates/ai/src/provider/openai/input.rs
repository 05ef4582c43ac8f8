use serde::Serialize;

use crate::messages::{ChatMessage, ChatRequest, ChatRole};

/// Request body for the OpenAI chat completions API.
#[derive(Debug, Serialize)]
pub(super) struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    pub stream: bool,
}

/// Chat message in OpenAI wire format.
#[derive(Debug, Serialize)]
pub(super) struct OpenAIMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<ChatMessage> for OpenAIMessage {
    fn from(msg: ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content,
            name: msg.name,
        }
    }
}

impl From<&ChatRequest> for OpenAIRequest {
    fn from(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request.messages.iter().cloned().map(OpenAIMessage::from).collect(),
            temperature: request.config.temperature,
            max_tokens: request.config.max_tokens,
            top_p: request.config.top_p,
            frequency_penalty: request.config.frequency_penalty,
            presence_penalty: request.config.presence_penalty,
            stream: false,
        }
    }
}

/// Request body for the OpenAI embeddings API. One text per call; the
/// processor drives the per-text loop.
#[derive(Debug, Serialize)]
pub(super) struct OpenAIEmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a str,
}
