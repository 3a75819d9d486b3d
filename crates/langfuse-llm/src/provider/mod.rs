//! Provider trait and implementations for LLM backends

pub mod anthropic;
pub mod bedrock;
pub mod google;
pub mod openai;
pub mod vertex_auth;

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use langfuse_config::LlmConfig;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, StreamEvent};

/// Boxed stream of internal stream events
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Delay before the first retry
const RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on the delay between two retries
const RETRY_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Capabilities advertised by a provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderCapabilities {
    /// Whether the provider supports streaming responses
    pub streaming: bool,
    /// Whether the provider supports tool/function calling
    pub tool_calling: bool,
}

/// Trait implemented by each LLM provider backend
///
/// Tools and structured output travel on the [`CompletionRequest`]; every
/// backend converts them to its own wire representation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Advertised capabilities
    fn capabilities(&self) -> ProviderCapabilities;

    /// Send a non-streaming completion request
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Send a streaming completion request
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<EventStream, LlmError>;
}

/// Per-call credentials and endpoint overrides handed to a provider
pub struct ProviderSettings {
    /// Decrypted API key or credential blob
    pub api_key: SecretString,
    /// Base URL override
    pub base_url: Option<String>,
    /// Extra headers sent with every vendor request
    pub extra_headers: HashMap<String, String>,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Shared HTTP clients, built once from configuration
///
/// Vendor calls go through the proxy and carry the configured timeout.
/// PowerRAG calls go through the proxy without a timeout, since blocking
/// answers may take minutes.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    power_rag: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build the clients
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Internal` if the timeout is invalid or a client cannot be built.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let timeout = config.timeout()?;

        let client = client_builder(config.https_proxy.as_ref())?
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build LLM HTTP client: {e}"))?;
        let power_rag = client_builder(config.https_proxy.as_ref())?
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build PowerRAG HTTP client: {e}"))?;

        if config.https_proxy.is_some() {
            tracing::debug!("routing LLM traffic through configured HTTPS proxy");
        }

        Ok(Self {
            client,
            power_rag,
            timeout,
        })
    }

    /// Client for vendor APIs
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Client for PowerRAG
    pub const fn power_rag_client(&self) -> &Client {
        &self.power_rag
    }

    /// Per-request timeout for vendor calls
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self {
            client: Client::new(),
            power_rag: Client::new(),
            timeout: Duration::from_secs(120),
        }
    }
}

fn client_builder(proxy: Option<&Url>) -> Result<reqwest::ClientBuilder, LlmError> {
    let mut builder = Client::builder();
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::https(proxy.as_str()).map_err(|e| anyhow::anyhow!("invalid https proxy: {e}"))?;
        builder = builder.proxy(proxy);
    }
    Ok(builder)
}

/// Exponential backoff with jitter, capped at [`RETRY_MAX_INTERVAL`]
///
/// Never gives up on its own; the attempt budget is enforced by
/// [`send_with_retry`].
fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(RETRY_INITIAL_INTERVAL)
        .with_max_interval(RETRY_MAX_INTERVAL)
        .with_max_elapsed_time(None)
        .build()
}

/// Send a request, retrying transport failures and retryable statuses
///
/// `build` is called once per attempt, at most `max_retries + 1` times.
/// Non-success responses become `LlmError::Upstream` carrying the vendor
/// status and body.
pub(crate) async fn send_with_retry<F>(provider: &str, max_retries: u32, build: F) -> Result<Response, LlmError>
where
    F: Fn() -> RequestBuilder + Send,
{
    let mut attempts = 0u32;

    let operation = move || {
        let attempt = attempts;
        attempts = attempts.saturating_add(1);
        let request = build();

        async move {
            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    LlmError::upstream(status, body)
                }
                Err(e) => LlmError::Upstream {
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                },
            };

            if attempt >= max_retries || !error.is_retryable() {
                tracing::warn!(provider, attempt, error = %error, "upstream request failed");
                return Err(backoff::Error::permanent(error));
            }

            Err(backoff::Error::transient(error))
        }
    };

    let notify = |error: LlmError, delay: Duration| {
        tracing::debug!(
            provider,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "retrying upstream request"
        );
    };

    backoff::future::retry_notify(retry_policy(), operation, notify).await
}

/// Convert caller-supplied extra headers into a header map
///
/// Invalid entries are dropped with a warning naming the header only.
pub(crate) fn extra_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(mut value)) => {
                value.set_sensitive(true);
                map.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid extra header"),
        }
    }
    map
}

/// Decode a server-sent event stream of JSON payloads into internal events
///
/// Empty payloads and the `[DONE]` sentinel are skipped, as are payloads
/// that fail to parse.
pub(crate) fn sse_event_stream<T, F>(response: Response, mut convert: F) -> EventStream
where
    T: DeserializeOwned + 'static,
    F: FnMut(T) -> Vec<StreamEvent> + Send + 'static,
{
    let events = response.bytes_stream().eventsource().flat_map(move |result| {
        let items: Vec<Result<StreamEvent, LlmError>> = match result {
            Ok(event) => {
                let data = event.data.trim();
                if data.is_empty() || data == "[DONE]" {
                    Vec::new()
                } else {
                    match serde_json::from_str::<T>(data) {
                        Ok(chunk) => convert(chunk).into_iter().map(Ok).collect(),
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparseable SSE event");
                            Vec::new()
                        }
                    }
                }
            }
            Err(e) => vec![Err(LlmError::Streaming(e.to_string()))],
        };
        futures_util::stream::iter(items)
    });

    Box::pin(events)
}

/// Serialize a wire request and merge provider options at the top level
pub(crate) fn request_body<T: serde::Serialize>(
    wire: &T,
    request: &CompletionRequest,
) -> Result<serde_json::Value, LlmError> {
    let mut body = serde_json::to_value(wire).map_err(|e| anyhow::anyhow!("failed to encode request: {e}"))?;
    crate::types::request::merge_provider_options(&mut body, &request.provider_options);
    Ok(body)
}

/// Deserialize a successful vendor response body
pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, LlmError> {
    let status = response.status();
    response.json().await.map_err(|e| LlmError::Upstream {
        status: Some(status.as_u16()),
        message: format!("failed to parse response: {e}"),
    })
}
