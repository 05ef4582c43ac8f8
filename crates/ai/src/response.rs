//! Response construction, integrity validation and metrics logging.
//!
//! Everything here is a pure function taking the request id as an
//! argument. There is deliberately no handler object carrying the id as
//! state: a shared instance would cross-contaminate correlation ids
//! between concurrent requests.

use std::time::Duration;

use crate::messages::{ChatResponse, ChatStreamChunk, EmbeddingResponse, FinishReason, TokenUsage};

/// Runaway-response guard: responses longer than this are rejected.
pub const MAX_RESPONSE_CONTENT_CHARS: usize = 100_000;

pub fn chat_response(
    request_id: &str,
    content: String,
    model: String,
    usage: Option<TokenUsage>,
    finish_reason: Option<FinishReason>,
) -> ChatResponse {
    ChatResponse {
        content,
        model,
        usage,
        finish_reason,
        request_id: request_id.to_string(),
    }
}

pub fn stream_chunk(
    request_id: &str,
    content: String,
    model: String,
    usage: Option<TokenUsage>,
    finish_reason: Option<FinishReason>,
) -> ChatStreamChunk {
    ChatStreamChunk {
        content,
        model,
        usage,
        finish_reason,
        request_id: request_id.to_string(),
    }
}

pub fn embedding_response(
    request_id: &str,
    embeddings: Vec<Vec<f32>>,
    model: String,
    usage: Option<TokenUsage>,
) -> EmbeddingResponse {
    EmbeddingResponse {
        embeddings,
        model,
        usage,
        request_id: request_id.to_string(),
    }
}

/// Whether response content is usable: non-empty and below the
/// runaway guard.
pub fn validate_response_content(content: &str) -> bool {
    !content.is_empty() && content.chars().count() <= MAX_RESPONSE_CONTENT_CHARS
}

/// Whether an embedding matrix is usable: non-empty, no empty vectors,
/// every element finite.
pub fn validate_embeddings(embeddings: &[Vec<f32>]) -> bool {
    !embeddings.is_empty()
        && embeddings
            .iter()
            .all(|vector| !vector.is_empty() && vector.iter().all(|value| value.is_finite()))
}

pub fn log_response_metrics(
    request_id: &str,
    provider: &str,
    model: &str,
    content_chars: usize,
    elapsed: Duration,
    usage: Option<TokenUsage>,
) {
    let (input_tokens, output_tokens) = usage.map(|u| (u.input_tokens, u.output_tokens)).unwrap_or_default();

    log::info!(
        "chat completion {request_id}: provider={provider} model={model} chars={content_chars} \
         input_tokens={input_tokens} output_tokens={output_tokens} elapsed_ms={}",
        elapsed.as_millis()
    );
}

pub fn log_streaming_metrics(
    request_id: &str,
    provider: &str,
    model: &str,
    chunks: u64,
    content_chars: usize,
    elapsed: Duration,
) {
    log::info!(
        "streaming completion {request_id}: provider={provider} model={model} chunks={chunks} \
         chars={content_chars} elapsed_ms={}",
        elapsed.as_millis()
    );
}

pub fn log_embedding_metrics(
    request_id: &str,
    provider: &str,
    model: &str,
    vectors: usize,
    elapsed: Duration,
    usage: Option<TokenUsage>,
) {
    let input_tokens = usage.map(|u| u.input_tokens).unwrap_or_default();

    log::info!(
        "embeddings {request_id}: provider={provider} model={model} vectors={vectors} \
         input_tokens={input_tokens} elapsed_ms={}",
        elapsed.as_millis()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_validation_bounds() {
        assert!(validate_response_content("ok"));
        assert!(!validate_response_content(""));

        let at_limit = "a".repeat(MAX_RESPONSE_CONTENT_CHARS);
        assert!(validate_response_content(&at_limit));

        let over_limit = "a".repeat(MAX_RESPONSE_CONTENT_CHARS + 1);
        assert!(!validate_response_content(&over_limit));
    }

    #[test]
    fn embedding_validation() {
        assert!(validate_embeddings(&[vec![0.1, 0.2], vec![0.3, 0.4]]));
        assert!(!validate_embeddings(&[]));
        assert!(!validate_embeddings(&[vec![]]));
        assert!(!validate_embeddings(&[vec![0.1, f32::NAN]]));
    }

    #[test]
    fn responses_carry_the_request_id() {
        let response = chat_response("req_1", "hi".into(), "gpt-4".into(), None, None);
        assert_eq!(response.request_id, "req_1");

        let chunk = stream_chunk("req_1", "h".into(), "gpt-4".into(), None, None);
        assert_eq!(chunk.request_id, "req_1");

        let embeddings = embedding_response("req_2", vec![vec![0.5]], "text-embedding-3-small".into(), None);
        assert_eq!(embeddings.request_id, "req_2");
    }
}
