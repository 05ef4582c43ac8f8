mod input;
mod output;

use async_trait::async_trait;
use axum::http::HeaderMap;
use config::ProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};

use self::{
    input::{OpenAIEmbeddingRequest, OpenAIRequest},
    output::{OpenAIEmbeddingResponse, OpenAIResponse, OpenAIStreamChunk},
};

use crate::{
    error::AiError,
    messages::ChatRequest,
    provider::{Completion, CompletionStream, Provider},
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

pub(crate) struct OpenAIProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    name: String,
}

impl OpenAIProvider {
    pub fn new(name: String, config: &ProviderConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .default_headers(HeaderMap::new())
            .build()
            .map_err(|e| {
                log::error!("Failed to create HTTP client for OpenAI provider: {e}");
                AiError::InternalError(None)
            })?;

        // Use custom base URL if provided, otherwise use default
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_API_URL.to_string());

        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AiError::AuthenticationFailed(format!("provider '{name}' has no API key")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            name,
        })
    }

    fn authorization(&self) -> String {
        format!("Bearer {}", self.api_key.expose_secret())
    }
}

/// Map an OpenAI error status and body to the typed taxonomy.
///
/// Classification happens here, at the adapter, from the structured
/// status code rather than by re-parsing human-readable text downstream.
fn classify_error(status: StatusCode, error_text: String) -> AiError {
    match status.as_u16() {
        401 => AiError::AuthenticationFailed(error_text),
        403 => AiError::InsufficientQuota(error_text),
        404 => AiError::ModelNotFound(error_text),
        429 => AiError::RateLimitExceeded(error_text),
        // OpenAI reports context overflow as a 400 with a machine code in
        // the body
        400 if error_text.contains("context_length_exceeded") => AiError::ContextLengthExceeded(error_text),
        400 => AiError::InvalidRequest(error_text),
        500 => AiError::InternalError(Some(error_text)),
        other => AiError::ProviderApiError {
            status: other,
            message: error_text,
        },
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat_completion(&self, request: &ChatRequest) -> crate::Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut openai_request = OpenAIRequest::from(request);
        openai_request.stream = false;

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.authorization())
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(format!("Failed to send request to OpenAI: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI API error ({status}): {error_text}");

            return Err(classify_error(status, error_text));
        }

        // First get the response as text to log if parsing fails
        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read OpenAI response body: {e}");
            AiError::InternalError(None)
        })?;

        let openai_response: OpenAIResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse OpenAI chat completion response: {e}");
            log::error!("Raw response that failed to parse: {response_text}");
            AiError::InternalError(None)
        })?;

        Ok(Completion::from(openai_response))
    }

    async fn chat_completion_stream(&self, request: &ChatRequest) -> crate::Result<CompletionStream> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut openai_request = OpenAIRequest::from(request);
        openai_request.stream = true;

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.authorization())
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(format!("Failed to send streaming request to OpenAI: {e}")))?;

        let status = response.status();

        // Check for HTTP errors before attempting to stream
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI streaming API error ({status}): {error_text}");

            return Err(classify_error(status, error_text));
        }

        // Convert response bytes stream to SSE event stream
        let event_stream = response.bytes_stream().eventsource();

        // Transform the SSE event stream into completion deltas
        let delta_stream = event_stream.filter_map(|event| async move {
            // SSE parsing errors are logged and skipped
            let Ok(event) = event else {
                log::warn!("SSE parsing error in OpenAI stream");
                return None;
            };

            // Check for end marker
            if event.data == "[DONE]" {
                return None;
            }

            let Ok(chunk) = sonic_rs::from_str::<OpenAIStreamChunk>(&event.data) else {
                log::warn!("Failed to parse OpenAI streaming chunk");
                return None;
            };

            Some(Ok(chunk.into_delta()))
        });

        Ok(Box::pin(delta_stream))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str, model: &str) -> crate::Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIEmbeddingRequest { model, input: text };

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.authorization())
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(format!("Failed to send embedding request to OpenAI: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("OpenAI embeddings API error ({status}): {error_text}");

            return Err(classify_error(status, error_text));
        }

        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read OpenAI embeddings response body: {e}");
            AiError::InternalError(None)
        })?;

        let embedding_response: OpenAIEmbeddingResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse OpenAI embeddings response: {e}");
            AiError::InternalError(None)
        })?;

        embedding_response
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| {
                log::error!("OpenAI embeddings response contained no vectors");
                AiError::InvalidResponseContent
            })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
