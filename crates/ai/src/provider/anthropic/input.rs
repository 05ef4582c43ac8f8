use serde::Serialize;

use crate::messages::{ChatRequest, ChatRole};

/// Maximum tokens substituted when the caller did not set a limit; the
/// Anthropic Messages API requires the field.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Request body for the Anthropic Messages API.
#[derive(Debug, Serialize)]
pub(super) struct AnthropicRequest {
    pub model: String,

    /// Input messages. Anthropic models operate on alternating user and
    /// assistant turns; system prompts travel in the dedicated field.
    pub messages: Vec<AnthropicMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    pub stream: bool,
}

/// A message in the conversation with the model. The role must be either
/// "user" or "assistant".
#[derive(Debug, Serialize)]
pub(super) struct AnthropicMessage {
    pub role: ChatRole,
    pub content: String,
}

impl From<&ChatRequest> for AnthropicRequest {
    fn from(request: &ChatRequest) -> Self {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut anthropic_messages = Vec::new();

        for msg in &request.messages {
            match &msg.role {
                ChatRole::System => system_parts.push(&msg.content),
                ChatRole::User | ChatRole::Assistant => anthropic_messages.push(AnthropicMessage {
                    role: msg.role.clone(),
                    content: msg.content.clone(),
                }),
                ChatRole::Tool | ChatRole::Other(_) => {
                    log::warn!("unsupported chat role '{}' for Anthropic, treating as user", msg.role.as_str());
                    anthropic_messages.push(AnthropicMessage {
                        role: ChatRole::User,
                        content: msg.content.clone(),
                    });
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        Self {
            model: request.model.clone(),
            messages: anthropic_messages,
            system,
            max_tokens: request.config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: Some(request.config.temperature),
            top_p: request.config.top_p,
            stream: false,
        }
    }
}
