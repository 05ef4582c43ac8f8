use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Caller-input validation failures, detected before any network call.
///
/// Each variant corresponds to one rule of the request builder so callers
/// get a precise, actionable message without parsing free text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("messages cannot be empty")]
    EmptyMessages,

    #[error("message at index {index} has empty content")]
    EmptyContent { index: usize },

    #[error("invalid role '{role}' at index {index}: must be system, user or assistant")]
    InvalidRole { role: String, index: usize },

    #[error("user_id cannot be empty")]
    EmptyUserId,

    #[error("temperature must be between 0 and 2, got {0}")]
    TemperatureOutOfRange(f32),

    #[error("max_tokens must be a positive integer")]
    NonPositiveMaxTokens,

    #[error("max_context_chunks must be a positive integer")]
    NonPositiveContextChunks,

    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("texts cannot be empty")]
    EmptyTexts,

    #[error("text at index {index} is empty")]
    EmptyText { index: usize },

    #[error("model cannot be empty")]
    EmptyModel,
}

/// AI service errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum AiError {
    /// Malformed caller input. Always recoverable by correcting the request.
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// Invalid model format or missing provider/model in request.
    #[error("Invalid model format: expected 'provider/model', got '{0}'")]
    InvalidModelFormat(String),

    /// Provider not configured or its client could not be constructed.
    #[error("Provider '{0}' is not available")]
    ProviderNotAvailable(String),

    /// Model not in the provider's available-models list.
    #[error("Model '{model}' is not available for provider '{provider}'")]
    ModelNotAvailable { provider: String, model: String },

    /// No model given and the provider has no registered default.
    #[error("No default model configured for provider '{0}'")]
    NoDefaultModel(String),

    /// Authentication failed upstream (missing or invalid API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Upstream rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Insufficient quota or credits at the provider.
    #[error("Insufficient quota: {0}")]
    InsufficientQuota(String),

    /// The provider rejected the model name.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The conversation exceeded the model's context window.
    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    /// The provider rejected the request as malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Streaming requested from a provider that does not support it.
    #[error("Streaming is not supported by this provider. Set stream=false or omit the parameter.")]
    StreamingNotSupported,

    /// Provider API returned an error we have no dedicated variant for.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The provider returned content that failed integrity validation
    /// (empty, or past the runaway-response guard).
    #[error("Provider returned invalid response content")]
    InvalidResponseContent,

    /// The estimated request cost would push the user past a spend ceiling.
    #[error("Daily cost limit exceeded: current spend {current_daily_cost:.4} USD, limit {daily_limit:.2} USD")]
    CostLimitExceeded {
        current_daily_cost: f64,
        daily_limit: f64,
    },

    /// Internal server error.
    /// If Some(message), it came from a provider and can be shown.
    /// If None, it's an internal error and should not leak details.
    #[error("Internal server error")]
    InternalError(Option<String>),
}

impl AiError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidModelFormat(_)
            | Self::InvalidRequest(_)
            | Self::ContextLengthExceeded(_)
            | Self::StreamingNotSupported => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientQuota(_) | Self::CostLimitExceeded { .. } => StatusCode::FORBIDDEN,
            Self::ProviderNotAvailable(_)
            | Self::ModelNotAvailable { .. }
            | Self::NoDefaultModel(_)
            | Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::ConnectionError(_) | Self::InvalidResponseContent => StatusCode::BAD_GATEWAY,
            Self::ProviderApiError { status, .. } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string for the response.
    pub fn error_type(&self) -> &str {
        match self {
            Self::Validation(_)
            | Self::InvalidModelFormat(_)
            | Self::InvalidRequest(_)
            | Self::ContextLengthExceeded(_)
            | Self::StreamingNotSupported => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::InsufficientQuota(_) | Self::CostLimitExceeded { .. } => "insufficient_quota",
            Self::ProviderNotAvailable(_)
            | Self::ModelNotAvailable { .. }
            | Self::NoDefaultModel(_)
            | Self::ModelNotFound(_) => "not_found_error",
            Self::RateLimitExceeded(_) => "rate_limit_error",
            Self::ConnectionError(_) | Self::ProviderApiError { .. } | Self::InvalidResponseContent => "api_error",
            Self::InternalError(_) => "internal_error",
        }
    }
}

/// Error response format compatible with OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for AiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log all 5xx errors for administrators
        if status.is_server_error() {
            match &self {
                Self::InternalError(Some(provider_msg)) => {
                    log::error!("Provider returned internal error: {provider_msg}");
                }
                Self::InternalError(None) => {
                    // Full error details are already logged where the error was created
                    log::error!("Internal server error occurred");
                }
                _ => {
                    log::error!("Server error ({}): {}", status.as_u16(), self);
                }
            }
        }

        // For internal errors, only show provider messages, not our internals
        let message = match &self {
            Self::InternalError(Some(provider_msg)) => provider_msg.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message,
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_requests() {
        let err = AiError::from(ValidationError::EmptyMessages);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_type(), "invalid_request_error");
    }

    #[test]
    fn provider_status_codes_pass_through() {
        let err = AiError::ProviderApiError {
            status: 429,
            message: "slow down".into(),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let err = AiError::ProviderApiError {
            status: 503,
            message: "overloaded".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn cost_limit_message_names_the_numbers() {
        let err = AiError::CostLimitExceeded {
            current_daily_cost: 9.87654,
            daily_limit: 10.0,
        };
        let message = err.to_string();
        assert!(message.contains("9.8765"));
        assert!(message.contains("10.00"));
    }
}
