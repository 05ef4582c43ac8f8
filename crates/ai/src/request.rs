//! Request validation and assembly.
//!
//! All caller input passes through here before anything touches the
//! network. Validation fails fast: the first violated rule wins, and every
//! rule maps to its own [`ValidationError`] variant.

use config::ProviderType;
use uuid::Uuid;

use crate::{
    error::ValidationError,
    messages::{ChatConfig, ChatMessage, ChatRequest, ChatRole, EmbeddingRequest},
};

/// Build a validated chat request from raw caller input.
///
/// Validation order: messages, roles and content, user id, provider,
/// temperature, max_tokens, max_context_chunks. The model string is
/// taken as-is; default substitution and catalog checks are the
/// processor's job.
pub fn build_chat_request(
    messages: Vec<ChatMessage>,
    user_id: &str,
    provider: &str,
    model: String,
    config: ChatConfig,
) -> crate::Result<ChatRequest> {
    if messages.is_empty() {
        return Err(ValidationError::EmptyMessages.into());
    }

    for (index, message) in messages.iter().enumerate() {
        // The domain model also carries a `tool` role for provider
        // round-trips, but caller-supplied conversations only get the three
        // conversational roles.
        match message.role {
            ChatRole::System | ChatRole::User | ChatRole::Assistant => {}
            ref other => {
                return Err(ValidationError::InvalidRole {
                    role: other.as_str().to_string(),
                    index,
                }
                .into());
            }
        }

        if message.content.is_empty() {
            return Err(ValidationError::EmptyContent { index }.into());
        }
    }

    if user_id.is_empty() {
        return Err(ValidationError::EmptyUserId.into());
    }

    let provider = parse_provider(provider)?;

    if !(0.0..=2.0).contains(&config.temperature) {
        return Err(ValidationError::TemperatureOutOfRange(config.temperature).into());
    }

    if config.max_tokens == Some(0) {
        return Err(ValidationError::NonPositiveMaxTokens.into());
    }

    // Zero would silently turn knowledge-base retrieval into a no-op.
    if config.max_context_chunks == 0 {
        return Err(ValidationError::NonPositiveContextChunks.into());
    }

    Ok(ChatRequest {
        messages,
        user_id: user_id.to_string(),
        provider,
        model,
        config,
    })
}

/// Build a validated embedding request.
pub fn build_embedding_request(
    texts: Vec<String>,
    provider: &str,
    model: String,
) -> crate::Result<EmbeddingRequest> {
    if texts.is_empty() {
        return Err(ValidationError::EmptyTexts.into());
    }

    if let Some(index) = texts.iter().position(|text| text.is_empty()) {
        return Err(ValidationError::EmptyText { index }.into());
    }

    let provider = parse_provider(provider)?;

    if model.is_empty() {
        return Err(ValidationError::EmptyModel.into());
    }

    Ok(EmbeddingRequest { texts, provider, model })
}

/// Generate a fresh globally-unique request identifier.
///
/// The id correlates a logical request across its response, streamed
/// chunks, logs and metrics. It is always a function argument downstream,
/// never instance state.
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn parse_provider(provider: &str) -> Result<ProviderType, ValidationError> {
    provider
        .parse()
        .map_err(|_| ValidationError::UnknownProvider(provider.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AiError;

    fn user_messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("What is the capital of France?")]
    }

    fn expect_validation(result: crate::Result<ChatRequest>) -> ValidationError {
        match result {
            Err(AiError::Validation(e)) => e,
            other => unreachable!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn builds_request_with_defaults() {
        let request = build_chat_request(
            user_messages(),
            "user-1",
            "openai",
            "gpt-4".into(),
            ChatConfig::default(),
        )
        .unwrap();

        assert_eq!(request.provider, ProviderType::Openai);
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.config.temperature, 0.7);
        assert_eq!(request.config.max_context_chunks, 5);
        assert!(request.config.use_knowledge_base);
        assert!(request.config.use_tools);
    }

    #[test]
    fn rejects_empty_messages() {
        let result = build_chat_request(vec![], "user-1", "openai", "gpt-4".into(), ChatConfig::default());
        assert_eq!(expect_validation(result), ValidationError::EmptyMessages);
    }

    #[test]
    fn rejects_tool_role_at_the_boundary() {
        let messages = vec![ChatMessage {
            role: ChatRole::Tool,
            content: "tool output".into(),
            name: None,
        }];

        let result = build_chat_request(messages, "user-1", "openai", "gpt-4".into(), ChatConfig::default());
        assert_eq!(
            expect_validation(result),
            ValidationError::InvalidRole {
                role: "tool".into(),
                index: 0
            }
        );
    }

    #[test]
    fn rejects_empty_content() {
        let messages = vec![ChatMessage::user("")];
        let result = build_chat_request(messages, "user-1", "openai", "gpt-4".into(), ChatConfig::default());
        assert_eq!(expect_validation(result), ValidationError::EmptyContent { index: 0 });
    }

    #[test]
    fn rejects_empty_user_id() {
        let result = build_chat_request(user_messages(), "", "openai", "gpt-4".into(), ChatConfig::default());
        assert_eq!(expect_validation(result), ValidationError::EmptyUserId);
    }

    #[test]
    fn rejects_unknown_provider() {
        let result = build_chat_request(user_messages(), "user-1", "aleph", "m".into(), ChatConfig::default());
        assert_eq!(
            expect_validation(result),
            ValidationError::UnknownProvider("aleph".into())
        );
    }

    #[test]
    fn rejects_temperature_out_of_range() {
        for temperature in [-0.1, 2.1] {
            let config = ChatConfig {
                temperature,
                ..ChatConfig::default()
            };
            let result = build_chat_request(user_messages(), "user-1", "openai", "gpt-4".into(), config);
            assert_eq!(
                expect_validation(result),
                ValidationError::TemperatureOutOfRange(temperature)
            );
        }
    }

    #[test]
    fn accepts_temperature_bounds() {
        for temperature in [0.0, 2.0] {
            let config = ChatConfig {
                temperature,
                ..ChatConfig::default()
            };
            assert!(build_chat_request(user_messages(), "user-1", "openai", "gpt-4".into(), config).is_ok());
        }
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let config = ChatConfig {
            max_tokens: Some(0),
            ..ChatConfig::default()
        };
        let result = build_chat_request(user_messages(), "user-1", "openai", "gpt-4".into(), config);
        assert_eq!(expect_validation(result), ValidationError::NonPositiveMaxTokens);
    }

    #[test]
    fn rejects_zero_context_chunks() {
        let config = ChatConfig {
            max_context_chunks: 0,
            ..ChatConfig::default()
        };
        let result = build_chat_request(user_messages(), "user-1", "openai", "gpt-4".into(), config);
        assert_eq!(expect_validation(result), ValidationError::NonPositiveContextChunks);
    }

    #[test]
    fn validation_order_is_messages_first() {
        // Both messages and user_id are invalid; the message rule wins.
        let result = build_chat_request(vec![], "", "aleph", "".into(), ChatConfig::default());
        assert_eq!(expect_validation(result), ValidationError::EmptyMessages);
    }

    #[test]
    fn embedding_request_validation() {
        assert!(build_embedding_request(vec!["hello".into()], "openai", "text-embedding-3-small".into()).is_ok());

        let err = build_embedding_request(vec![], "openai", "m".into()).unwrap_err();
        assert!(matches!(err, AiError::Validation(ValidationError::EmptyTexts)));

        let err = build_embedding_request(vec!["ok".into(), String::new()], "openai", "m".into()).unwrap_err();
        assert!(matches!(err, AiError::Validation(ValidationError::EmptyText { index: 1 })));

        let err = build_embedding_request(vec!["ok".into()], "openai", String::new()).unwrap_err();
        assert!(matches!(err, AiError::Validation(ValidationError::EmptyModel)));
    }

    #[test]
    fn request_ids_are_unique() {
        let first = generate_request_id();
        let second = generate_request_id();

        assert!(first.starts_with("req_"));
        assert_ne!(first, second);
    }
}
