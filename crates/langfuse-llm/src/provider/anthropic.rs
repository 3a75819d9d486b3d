//! Anthropic Messages API provider implementation

use async_trait::async_trait;
use http::header::HeaderMap;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};

use super::{
    EventStream, HttpTransport, Provider, ProviderCapabilities, ProviderSettings, extra_header_map, parse_json,
    request_body, send_with_retry, sse_event_stream,
};
use crate::convert::anthropic::AnthropicStreamState;
use crate::error::LlmError;
use crate::protocol::anthropic::{AnthropicRequest, AnthropicResponse, AnthropicStreamEvent};
use crate::types::{CompletionRequest, CompletionResponse};

/// Default Anthropic API base URL
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    headers: HeaderMap,
    max_retries: u32,
}

impl AnthropicProvider {
    /// Create a provider
    pub fn new(transport: &HttpTransport, settings: ProviderSettings) -> Self {
        let base_url = settings
            .base_url
            .filter(|url| !url.trim().is_empty())
            .map_or_else(|| DEFAULT_BASE_URL.to_owned(), |url| url.trim_end_matches('/').to_owned());

        Self {
            client: transport.client().clone(),
            base_url,
            api_key: settings.api_key,
            headers: extra_header_map(&settings.extra_headers),
            max_retries: settings.max_retries,
        }
    }

    fn request(&self, body: &serde_json::Value) -> RequestBuilder {
        self.client
            .post(format!("{}/messages", self.base_url))
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("x-api-key", self.api_key.expose_secret())
            .headers(self.headers.clone())
            .json(body)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = request_body(&AnthropicRequest::from(request), request)?;
        let response = send_with_retry(self.name(), self.max_retries, || self.request(&body)).await?;
        let wire_response: AnthropicResponse = parse_json(response).await?;

        Ok(wire_response.into())
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<EventStream, LlmError> {
        let mut wire = AnthropicRequest::from(request);
        wire.stream = Some(true);
        let body = request_body(&wire, request)?;
        let response = send_with_retry(self.name(), self.max_retries, || self.request(&body)).await?;

        let mut state = AnthropicStreamState::new();
        Ok(sse_event_stream(response, move |event: AnthropicStreamEvent| {
            state.convert_event(&event)
        }))
    }
}
