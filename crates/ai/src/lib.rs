//! AI gateway core: provider adapters, the chat pipeline and its axum
//! surface.

use std::{convert::Infallible, pin::Pin, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Json, Query, State},
    response::{IntoResponse, Sse, sse::Event},
    routing::{get, post},
};
use config::AiConfig;
use futures::{Stream, StreamExt};
use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};

mod error;
mod messages;
mod middleware;
mod processor;
mod provider;
mod request;
mod response;
mod service;
mod token_counter;

pub use error::{AiError, ValidationError};
pub use messages::{
    ChatConfig, ChatMessage, ChatResponse, ChatRole, ChatStreamChunk, EmbeddingResponse, FinishReason, Model,
    ModelsResponse, ObjectType, TokenUsage,
};
pub use middleware::{
    CostLimitCheck, CostLimits, CostRecord, CostSummary, CostTracker, DailyCost, ModelUsage, RagContext, RetrievedChunk,
    Retriever, ToolCall, ToolExecutionResult, ToolInfo, ToolProvider,
};
pub use provider::{ProviderManager, ProviderStatus};
pub use service::{AiService, AiServiceBuilder};

pub(crate) type Result<T> = std::result::Result<T, AiError>;

/// A stream of chat completion chunks, all carrying one request id.
pub type ChatStream = Pin<Box<dyn Stream<Item = std::result::Result<ChatStreamChunk, AiError>> + Send>>;

/// Optional collaborators injected into the service.
///
/// Every field may be absent; the service degrades gracefully without
/// them.
#[derive(Default)]
pub struct Collaborators {
    pub retriever: Option<Arc<dyn Retriever>>,
    pub tool_provider: Option<Arc<dyn ToolProvider>>,
    pub cost_tracker: Option<Arc<dyn CostTracker>>,
}

// Cache the aggregated models listing for 5 minutes.
const MODELS_CACHE_DURATION: Duration = Duration::from_secs(300);

struct AppState {
    service: AiService,
    models_cache: Cache<(), ModelsResponse>,
}

/// Creates an axum router for the AI endpoints, nested under the
/// configured path.
pub fn router(config: &AiConfig, collaborators: Collaborators) -> Router {
    let mut builder = AiService::builder(config);

    if let Some(retriever) = collaborators.retriever {
        builder = builder.retriever(retriever);
    }
    if let Some(tool_provider) = collaborators.tool_provider {
        builder = builder.tool_provider(tool_provider);
    }
    if let Some(cost_tracker) = collaborators.cost_tracker {
        builder = builder.cost_tracker(cost_tracker);
    }

    let state = Arc::new(AppState {
        service: builder.build(),
        models_cache: Cache::builder().time_to_live(MODELS_CACHE_DURATION).build(),
    });

    let ai_routes = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/models", get(list_models))
        .route("/v1/providers", get(provider_status))
        .route("/v1/usage/summary", get(usage_summary))
        .route("/v1/usage/daily", get(usage_daily))
        .route("/v1/usage/models", get(usage_models))
        .with_state(state);

    Router::new().nest(&config.path, ai_routes)
}

fn default_user() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChatCompletionBody {
    /// Full model reference in `provider/model` form. An empty model part
    /// selects the provider's default.
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default = "default_user")]
    user: String,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    frequency_penalty: Option<f32>,
    #[serde(default)]
    presence_penalty: Option<f32>,
    #[serde(default)]
    use_knowledge_base: Option<bool>,
    #[serde(default)]
    use_tools: Option<bool>,
    #[serde(default)]
    max_context_chunks: Option<usize>,
}

impl ChatCompletionBody {
    fn chat_config(&self) -> ChatConfig {
        let defaults = ChatConfig::default();

        ChatConfig {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.or(defaults.top_p),
            frequency_penalty: self.frequency_penalty.or(defaults.frequency_penalty),
            presence_penalty: self.presence_penalty.or(defaults.presence_penalty),
            use_knowledge_base: self.use_knowledge_base.unwrap_or(defaults.use_knowledge_base),
            use_tools: self.use_tools.unwrap_or(defaults.use_tools),
            max_context_chunks: self.max_context_chunks.unwrap_or(defaults.max_context_chunks),
        }
    }
}

/// Error payload emitted as an SSE data event when a stream fails
/// mid-flight.
#[derive(Debug, Serialize)]
struct StreamErrorEvent<'a> {
    error: &'a str,
}

/// Split a `provider/model` reference. An empty model part means "use the
/// provider default".
fn split_model(model: &str) -> Result<(&str, Option<String>)> {
    let Some((provider, model_name)) = model.split_once('/') else {
        return Err(AiError::InvalidModelFormat(model.to_string()));
    };

    if provider.is_empty() {
        return Err(AiError::InvalidModelFormat(model.to_string()));
    }

    let model_name = (!model_name.is_empty()).then(|| model_name.to_string());

    Ok((provider, model_name))
}

/// Handle chat completion requests.
///
/// Supports both streaming and non-streaming responses. When
/// `stream: true` is set, the response is sent as Server-Sent Events and
/// terminated with a `[DONE]` marker. Otherwise a standard JSON response
/// is returned.
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatCompletionBody>,
) -> Result<impl IntoResponse> {
    log::info!("chat completions handler called for model: {}", body.model);
    log::debug!("request has {} messages", body.messages.len());

    let (provider, model) = split_model(&body.model)?;
    let config = body.chat_config();

    if body.stream.unwrap_or(false) {
        let stream = state
            .service
            .chat_completion_stream(body.messages, &body.user, provider, model, config)
            .await?;

        let provider = provider.to_string();
        let event_stream = stream.map(move |result| {
            let event = match result {
                Ok(mut chunk) => {
                    // Restore the full provider-prefixed model reference.
                    chunk.model = format!("{provider}/{}", chunk.model);

                    let json = sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
                        log::error!("Failed to serialize chunk: {e}");
                        r#"{"error":"serialization failed"}"#.to_string()
                    });

                    Event::default().data(json)
                }
                Err(e) => {
                    log::error!("Stream error: {e}");

                    let message = e.to_string();
                    let json = sonic_rs::to_string(&StreamErrorEvent { error: &message })
                        .unwrap_or_else(|_| r#"{"error":"stream failed"}"#.to_string());

                    Event::default().data(json)
                }
            };

            Ok::<_, Infallible>(event)
        });

        let with_done = event_stream.chain(futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().data("[DONE]"))
        }));

        log::debug!("returning streaming response");
        Ok(Sse::new(with_done).into_response())
    } else {
        let mut response = state
            .service
            .chat_completion(body.messages, &body.user, provider, model, config)
            .await?;

        // Restore the full provider-prefixed model reference.
        response.model = format!("{provider}/{}", response.model);

        Ok(Json(response).into_response())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    fn into_texts(self) -> Vec<String> {
        match self {
            Self::Single(text) => vec![text],
            Self::Batch(texts) => texts,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmbeddingBody {
    model: String,
    input: EmbeddingInput,
    #[serde(default = "default_user")]
    user: String,
}

/// Handle embedding requests.
async fn embeddings(State(state): State<Arc<AppState>>, Json(body): Json<EmbeddingBody>) -> Result<impl IntoResponse> {
    let (provider, model) = split_model(&body.model)?;

    let mut response = state
        .service
        .get_embeddings(body.input.into_texts(), &body.user, provider, model)
        .await?;

    response.model = format!("{provider}/{}", response.model);

    Ok(Json(response))
}

/// Handle list models requests.
///
/// The aggregated listing is cached with a TTL since the catalog only
/// changes on reconfiguration.
async fn list_models(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    if let Some(cached) = state.models_cache.get(&()) {
        log::debug!("Returning cached models (cache hit)");
        return Ok(Json(cached));
    }

    let manager = state.service.manager();
    let mut data = Vec::new();

    for provider in manager.available_providers() {
        for model in manager.available_models(&provider) {
            data.push(Model {
                id: format!("{provider}/{model}"),
                object: ObjectType::Model,
                owned_by: provider.clone(),
            });
        }
    }

    let response = ModelsResponse {
        object: ObjectType::List,
        data,
    };

    state.models_cache.insert((), response.clone());

    log::debug!("Returning {} models", response.data.len());
    Ok(Json(response))
}

/// Handle provider status requests.
async fn provider_status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    Ok(Json(state.service.manager().provider_status()))
}

fn default_usage_days() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
struct UsageParams {
    user_id: String,
    #[serde(default = "default_usage_days")]
    days: u32,
}

async fn usage_summary(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UsageParams>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.cost_summary(&params.user_id, params.days).await))
}

async fn usage_daily(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UsageParams>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.daily_costs(&params.user_id, params.days).await))
}

async fn usage_models(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UsageParams>,
) -> Result<impl IntoResponse> {
    Ok(Json(state.service.model_usage_stats(&params.user_id, params.days).await))
}
