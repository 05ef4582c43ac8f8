use serde::Deserialize;

use crate::{
    messages::{FinishReason, TokenUsage},
    provider::{Completion, CompletionDelta},
};

/// The reason why the model stopped generating tokens.
#[derive(Debug, Deserialize, PartialEq)]
pub(super) enum StopReason {
    #[serde(rename = "end_turn")]
    EndTurn,
    #[serde(rename = "max_tokens")]
    MaxTokens,
    #[serde(rename = "stop_sequence")]
    StopSequence,
    #[serde(rename = "tool_use")]
    ToolUse,
    /// Any other stop reason not yet known.
    /// Captures the actual string value for forward compatibility.
    #[serde(untagged)]
    Other(String),
}

impl From<StopReason> for FinishReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
            StopReason::MaxTokens => FinishReason::Length,
            StopReason::ToolUse => FinishReason::ToolCalls,
            StopReason::Other(other) => FinishReason::Other(other),
        }
    }
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Deserialize)]
pub(super) struct AnthropicResponse {
    pub model: String,
    pub content: Vec<AnthropicContent>,
    pub stop_reason: Option<StopReason>,
    pub usage: AnthropicUsage,
}

/// A content block in an Anthropic message response.
#[derive(Debug, Deserialize)]
pub(super) struct AnthropicContent {
    pub r#type: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Token usage for an Anthropic API request.
///
/// In streaming message_delta events input_tokens may be omitted.
#[derive(Debug, Deserialize, Clone, Copy)]
pub(super) struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl From<AnthropicUsage> for TokenUsage {
    fn from(usage: AnthropicUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

impl From<AnthropicResponse> for Completion {
    fn from(response: AnthropicResponse) -> Self {
        // Concatenate text blocks; tool_use and other block types have no
        // text payload here.
        let content: String = response
            .content
            .iter()
            .filter(|block| block.r#type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        Self {
            content,
            model: response.model,
            usage: Some(response.usage.into()),
            finish_reason: response.stop_reason.map(Into::into),
        }
    }
}

/// One SSE event of an Anthropic streaming response, tagged by type.
///
/// Only `content_block_delta` and `message_delta` carry data we forward;
/// the bookkeeping events collapse to nothing.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(super) enum AnthropicStreamEvent {
    #[serde(rename = "message_start")]
    MessageStart {
        #[serde(default)]
        message: Option<MessageStartBody>,
    },
    #[serde(rename = "content_block_start")]
    ContentBlockStart,
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: ContentDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop,
    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        delta: Option<MessageDeltaBody>,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "ping")]
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageStartBody {
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ContentDelta {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

impl AnthropicStreamEvent {
    /// Convert an event into a completion delta, `None` for events that
    /// carry nothing downstream.
    pub fn into_delta(self) -> Option<CompletionDelta> {
        match self {
            Self::MessageStart { message } => {
                let usage = message.and_then(|m| m.usage).map(TokenUsage::from)?;

                Some(CompletionDelta {
                    usage: Some(usage),
                    ..CompletionDelta::default()
                })
            }
            Self::ContentBlockDelta { delta } => Some(CompletionDelta {
                content: delta.text.unwrap_or_default(),
                ..CompletionDelta::default()
            }),
            Self::MessageDelta { delta, usage } => Some(CompletionDelta {
                content: String::new(),
                usage: usage.map(Into::into),
                finish_reason: delta.and_then(|d| d.stop_reason).map(Into::into),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_blocks_concatenate() {
        let response: AnthropicResponse = sonic_rs::from_str(
            r#"{
                "model": "claude-3-haiku-20240307",
                "content": [
                    {"type": "text", "text": "Hello"},
                    {"type": "tool_use"},
                    {"type": "text", "text": " world"}
                ],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            }"#,
        )
        .unwrap();

        let completion = Completion::from(response);

        assert_eq!(completion.content, "Hello world");
        assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5
            })
        );
    }

    #[test]
    fn stream_events_collapse_to_deltas() {
        let event: AnthropicStreamEvent =
            sonic_rs::from_str(r#"{"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}"#)
                .unwrap();
        let delta = event.into_delta().unwrap();
        assert_eq!(delta.content, "Hi");
        assert!(delta.finish_reason.is_none());

        let event: AnthropicStreamEvent =
            sonic_rs::from_str(r#"{"type": "message_delta", "delta": {"stop_reason": "max_tokens"}, "usage": {"output_tokens": 42}}"#)
                .unwrap();
        let delta = event.into_delta().unwrap();
        assert_eq!(delta.finish_reason, Some(FinishReason::Length));

        let event: AnthropicStreamEvent = sonic_rs::from_str(r#"{"type": "ping"}"#).unwrap();
        assert!(event.into_delta().is_none());
    }
}
