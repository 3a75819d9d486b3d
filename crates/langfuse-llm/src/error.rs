use http::StatusCode;
use langfuse_core::HttpError;
use thiserror::Error;

/// Errors raised while producing a completion
#[derive(Debug, Error)]
pub enum LlmError {
    /// Vendor call failed, either in transport or with a non-success status
    #[error("upstream error: {message}")]
    Upstream {
        /// HTTP status returned by the vendor, if a response arrived
        status: Option<u16>,
        /// Response body or transport error
        message: String,
    },

    /// Error while draining a streamed response
    #[error("streaming error: {0}")]
    Streaming(String),

    /// PowerRAG answered with a non-success status
    #[error("PowerRAG API error: {status} {status_text} - {body}")]
    PowerRag {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase
        status_text: String,
        /// Response body
        body: String,
    },

    /// Caller supplied an unusable request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// API key or adapter config blob could not be parsed
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// No message yielded a PowerRAG query
    #[error("No user message found for PowerRAG query")]
    MissingQuery,

    /// Tool-call result did not have the expected shape
    #[error("Failed to parse LLM tool call result")]
    ToolCallParse,

    /// Structured output was missing or violated the caller's schema
    #[error("structured output does not match schema: {0}")]
    SchemaMismatch(String),

    /// Manual trace submission was rejected
    #[error("Failed to create trace: {message} (Status: {status})")]
    TraceRejected {
        /// Ingestion error message
        message: String,
        /// Ingestion status code
        status: u16,
    },

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    /// Build an upstream error from a vendor status and body
    pub fn upstream(status: StatusCode, body: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status.as_u16()),
            message: format!("provider returned {status}: {}", body.into()),
        }
    }

    /// Whether this error is raised regardless of `throw_on_error`
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::InvalidCredentials(_)
                | Self::MissingQuery
                | Self::ToolCallParse
                | Self::SchemaMismatch(_)
        )
    }

    /// Whether a vendor request that failed this way may be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status: None, .. } | Self::Streaming(_) => true,
            Self::Upstream { status: Some(status), .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Vendor error name for quota and throttling failures
    pub fn vendor_error_name(&self) -> Option<&'static str> {
        match self {
            Self::Upstream {
                status: Some(429),
                message,
            } if message.contains("insufficient_quota") => Some("InsufficientQuotaError"),
            Self::Upstream { status: Some(429), .. } => Some("ThrottlingException"),
            _ => None,
        }
    }
}

/// Statuses worth another attempt
pub(crate) const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 409 | 429) || status >= 500
}

impl HttpError for LlmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream { status: Some(status), .. } | Self::PowerRag { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Upstream { status: None, .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) | Self::InvalidCredentials(_) | Self::MissingQuery => StatusCode::BAD_REQUEST,
            Self::ToolCallParse | Self::SchemaMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Streaming(_) | Self::TraceRejected { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Upstream { .. } => "upstream_error",
            Self::PowerRag { .. } => "powerrag_error",
            Self::Streaming(_) => "streaming_error",
            Self::InvalidRequest(_) | Self::MissingQuery => "invalid_request_error",
            Self::InvalidCredentials(_) => "authentication_error",
            Self::ToolCallParse | Self::SchemaMismatch(_) => "output_parse_error",
            Self::TraceRejected { .. } => "tracing_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}
