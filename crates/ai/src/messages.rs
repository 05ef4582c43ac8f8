use config::ProviderType;
use serde::{Deserialize, Serialize};

/// Role of a chat message author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// Result of a tool execution fed back into the conversation.
    ///
    /// The role exists in the domain model for provider round-trips, but
    /// request validation rejects it at the API boundary. See the design
    /// notes before changing that.
    Tool,
    /// Any other role not yet known.
    /// Captures the actual string value for forward compatibility.
    #[serde(untagged)]
    Other(String),
}

impl ChatRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Other(role) => role,
        }
    }
}

/// A single message in a conversation turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Optional author name, forwarded verbatim to providers that accept it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            name: None,
        }
    }
}

/// Generation parameters for a chat completion.
///
/// Immutable once built into a [`ChatRequest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatConfig {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub use_knowledge_base: bool,
    pub use_tools: bool,
    pub max_context_chunks: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            use_knowledge_base: true,
            use_tools: true,
            max_context_chunks: 5,
        }
    }
}

/// A validated chat completion request. Built once per call, never mutated.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub user_id: String,
    pub provider: ProviderType,
    pub model: String,
    pub config: ChatConfig,
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// The reason why the model stopped generating tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// Any other finish reason not yet known.
    #[serde(untagged)]
    Other(String),
}

/// A complete (non-streaming) chat response.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    pub request_id: String,
}

/// One incremental chunk of a streaming chat response.
///
/// All chunks of one logical request carry the same `request_id` for
/// correlation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatStreamChunk {
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    pub request_id: String,
}

/// A validated embedding request.
#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub provider: ProviderType,
    pub model: String,
}

/// Embedding vectors, index-aligned with the request texts.
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub request_id: String,
}

/// Object type identifiers used in listing responses.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    List,
    Model,
}

/// Model information for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Model {
    pub id: String,
    pub object: ObjectType,
    pub owned_by: String,
}

/// Models list response.
#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub object: ObjectType,
    pub data: Vec<Model>,
}
