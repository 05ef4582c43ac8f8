//! Token counting for usage reporting.

use std::sync::OnceLock;

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::messages::ChatMessage;

/// Global tokenizer instance using cl100k_base encoding.
static TOKENIZER: OnceLock<CoreBPE> = OnceLock::new();

/// Get or initialize the tokenizer.
fn get_tokenizer() -> &'static CoreBPE {
    TOKENIZER.get_or_init(|| cl100k_base().expect("Failed to initialize cl100k_base tokenizer"))
}

/// Count input tokens for a conversation.
///
/// Uses the cl100k_base encoding shared by GPT-4 and GPT-3.5-turbo. Other
/// providers tokenize differently, but this is a reasonable approximation
/// when a provider does not report usage itself.
///
/// Each message carries ~3 tokens of structural overhead for its role
/// markers, and another 3 tokens are reserved for priming the assistant
/// reply, following OpenAI's token counting guidelines.
pub(crate) fn count_input_tokens(messages: &[ChatMessage]) -> u32 {
    let tokenizer = get_tokenizer();
    let mut total = 0;

    for message in messages {
        total += count_message_tokens(tokenizer, message);
    }

    total += messages.len() * 3;
    total += 3;

    u32::try_from(total).unwrap_or(u32::MAX)
}

/// Count tokens across a batch of embedding inputs.
pub(crate) fn count_text_tokens(texts: &[String]) -> u32 {
    let tokenizer = get_tokenizer();

    let total: usize = texts
        .iter()
        .map(|text| tokenizer.encode_ordinary(text).len())
        .sum();

    u32::try_from(total).unwrap_or(u32::MAX)
}

fn count_message_tokens(tokenizer: &CoreBPE, message: &ChatMessage) -> usize {
    let mut tokens = tokenizer.encode_ordinary(message.role.as_str()).len();
    tokens += tokenizer.encode_ordinary(&message.content).len();
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ChatMessage;

    #[test]
    fn count_simple_message() {
        let messages = vec![ChatMessage::user("Hello, how are you?")];

        let tokens = count_input_tokens(&messages);
        // ~6 content tokens, 1 role token, 3 message overhead, 3 priming
        assert!(tokens > 0);
        assert!(tokens < 20);
    }

    #[test]
    fn count_multiple_messages() {
        let messages = vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("What is the weather?"),
        ];

        let tokens = count_input_tokens(&messages);
        assert!(tokens > 10);
        assert!(tokens < 50);
    }

    #[test]
    fn empty_content_counts_role_and_overhead() {
        let messages = vec![ChatMessage::assistant("")];

        let tokens = count_input_tokens(&messages);
        assert!(tokens > 0);
    }

    #[test]
    fn text_batches_sum_per_text() {
        let one = count_text_tokens(&["hello world".to_string()]);
        let two = count_text_tokens(&["hello world".to_string(), "hello world".to_string()]);

        assert_eq!(two, one * 2);
    }
}
