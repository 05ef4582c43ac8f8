mod input;
mod output;

use async_trait::async_trait;
use axum::http::HeaderMap;
use config::ProviderConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;

use self::{
    input::AnthropicRequest,
    output::{AnthropicResponse, AnthropicStreamEvent},
};

use crate::{
    error::AiError,
    messages::ChatRequest,
    provider::{Completion, CompletionDelta, CompletionStream, Provider},
};

const DEFAULT_ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub(crate) struct AnthropicProvider {
    client: Client,
    base_url: String,
    name: String,
}

impl AnthropicProvider {
    pub fn new(name: String, config: &ProviderConfig) -> crate::Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| AiError::AuthenticationFailed(format!("provider '{name}' has no API key")))?;

        let mut headers = HeaderMap::new();

        headers.insert(
            "x-api-key",
            api_key.expose_secret().parse().map_err(|e| {
                log::error!("Failed to parse API key header for Anthropic provider: {e}");
                AiError::InternalError(None)
            })?,
        );

        headers.insert(
            "anthropic-version",
            ANTHROPIC_VERSION.parse().map_err(|e| {
                log::error!("Failed to parse Anthropic version header: {e}");
                AiError::InternalError(None)
            })?,
        );

        headers.insert(
            "content-type",
            "application/json".parse().map_err(|e| {
                log::error!("Failed to parse content-type header for Anthropic provider: {e}");
                AiError::InternalError(None)
            })?,
        );

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                log::error!("Failed to create HTTP client for Anthropic provider: {e}");
                AiError::InternalError(None)
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_URL.to_string());

        Ok(Self { client, base_url, name })
    }
}

/// Map an Anthropic error status and body to the typed taxonomy.
fn classify_error(status: StatusCode, error_text: String) -> AiError {
    match status.as_u16() {
        401 => AiError::AuthenticationFailed(error_text),
        403 => AiError::InsufficientQuota(error_text),
        404 => AiError::ModelNotFound(error_text),
        429 => AiError::RateLimitExceeded(error_text),
        400 if error_text.contains("prompt is too long") => AiError::ContextLengthExceeded(error_text),
        400 => AiError::InvalidRequest(error_text),
        500 => AiError::InternalError(Some(error_text)),
        other => AiError::ProviderApiError {
            status: other,
            message: error_text,
        },
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn chat_completion(&self, request: &ChatRequest) -> crate::Result<Completion> {
        let url = format!("{}/messages", self.base_url);

        let anthropic_request = AnthropicRequest::from(request);

        let response = self
            .client
            .post(&url)
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(format!("Failed to send request to Anthropic: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Anthropic API error ({status}): {error_text}");

            return Err(classify_error(status, error_text));
        }

        // First get the response as text to log if parsing fails
        let response_text = response.text().await.map_err(|e| {
            log::error!("Failed to read Anthropic response body: {e}");
            AiError::InternalError(None)
        })?;

        let anthropic_response: AnthropicResponse = sonic_rs::from_str(&response_text).map_err(|e| {
            log::error!("Failed to parse Anthropic chat completion response: {e}");
            log::error!("Raw response that failed to parse: {response_text}");
            AiError::InternalError(None)
        })?;

        Ok(Completion::from(anthropic_response))
    }

    async fn chat_completion_stream(&self, request: &ChatRequest) -> crate::Result<CompletionStream> {
        let url = format!("{}/messages", self.base_url);

        let mut anthropic_request = AnthropicRequest::from(request);
        anthropic_request.stream = true;

        let response = self
            .client
            .post(&url)
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(format!("Failed to send streaming request to Anthropic: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            log::error!("Anthropic streaming API error ({status}): {error_text}");

            return Err(classify_error(status, error_text));
        }

        let event_stream = response.bytes_stream().eventsource();

        // Anthropic sends typed SSE events; only some carry text deltas or
        // usage, the rest are dropped here.
        let delta_stream = event_stream.filter_map(|event| async move {
            let Ok(event) = event else {
                log::warn!("SSE parsing error in Anthropic stream");
                return None;
            };

            let Ok(stream_event) = sonic_rs::from_str::<AnthropicStreamEvent>(&event.data) else {
                log::warn!("Failed to parse Anthropic streaming event");
                return None;
            };

            stream_event.into_delta().map(Ok::<CompletionDelta, AiError>)
        });

        Ok(Box::pin(delta_stream))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn embed(&self, _text: &str, _model: &str) -> crate::Result<Vec<f32>> {
        // Anthropic has no embeddings endpoint
        Err(AiError::InvalidRequest(
            "Anthropic does not provide an embeddings API".to_string(),
        ))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
