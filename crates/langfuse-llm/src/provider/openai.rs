//! `OpenAI` chat completions provider, also serving Azure `OpenAI`

use async_trait::async_trait;
use http::header::HeaderMap;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};

use super::{
    EventStream, HttpTransport, Provider, ProviderCapabilities, ProviderSettings, extra_header_map, parse_json,
    request_body, send_with_retry, sse_event_stream,
};
use crate::convert::openai::{openai_chunk_to_events, use_json_object_mode};
use crate::error::LlmError;
use crate::protocol::openai::{OpenAiRequest, OpenAiResponse, OpenAiStreamChunk};
use crate::types::{CompletionRequest, CompletionResponse};

/// Default `OpenAI` API base URL
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Azure `OpenAI` API version
pub const AZURE_API_VERSION: &str = "2025-02-01-preview";

/// Which dialect of the chat completions API to speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiFlavor {
    /// `OpenAI` or an `OpenAI`-compatible API, bearer auth
    OpenAi,
    /// Azure deployment, `api-key` auth, deployment named by the model
    Azure,
}

/// Chat completions provider
pub struct OpenAiProvider {
    name: &'static str,
    client: Client,
    base_url: String,
    api_key: SecretString,
    headers: HeaderMap,
    flavor: OpenAiFlavor,
    max_retries: u32,
}

impl OpenAiProvider {
    /// Create a provider
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidRequest` for an Azure provider without a base URL.
    pub fn new(transport: &HttpTransport, flavor: OpenAiFlavor, settings: ProviderSettings) -> Result<Self, LlmError> {
        let base_url = match (flavor, settings.base_url) {
            (_, Some(url)) if !url.trim().is_empty() => url.trim_end_matches('/').to_owned(),
            (OpenAiFlavor::OpenAi, _) => DEFAULT_BASE_URL.to_owned(),
            (OpenAiFlavor::Azure, _) => {
                return Err(LlmError::InvalidRequest("Azure requires a base URL".to_owned()));
            }
        };

        Ok(Self {
            name: match flavor {
                OpenAiFlavor::OpenAi => "openai",
                OpenAiFlavor::Azure => "azure",
            },
            client: transport.client().clone(),
            base_url,
            api_key: settings.api_key,
            headers: extra_header_map(&settings.extra_headers),
            flavor,
            max_retries: settings.max_retries,
        })
    }

    /// Whether the endpoint understands strict `json_schema` response formats
    fn supports_json_schema(&self) -> bool {
        self.flavor == OpenAiFlavor::OpenAi
            && url::Url::parse(&self.base_url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h == "api.openai.com"))
                .unwrap_or(false)
    }

    fn completions_url(&self, model: &str) -> String {
        match self.flavor {
            OpenAiFlavor::OpenAi => format!("{}/chat/completions", self.base_url),
            OpenAiFlavor::Azure => format!(
                "{}/{model}/chat/completions?api-version={AZURE_API_VERSION}",
                self.base_url
            ),
        }
    }

    fn request(&self, model: &str, body: &serde_json::Value) -> RequestBuilder {
        let builder = self
            .client
            .post(self.completions_url(model))
            .headers(self.headers.clone())
            .json(body);

        match self.flavor {
            OpenAiFlavor::OpenAi => builder.bearer_auth(self.api_key.expose_secret()),
            OpenAiFlavor::Azure => builder.header("api-key", self.api_key.expose_secret()),
        }
    }

    fn wire_request(&self, request: &CompletionRequest) -> Result<serde_json::Value, LlmError> {
        let mut wire = OpenAiRequest::from(request);
        if let Some(output) = &request.structured_output
            && !self.supports_json_schema()
        {
            use_json_object_mode(&mut wire, output);
        }

        let mut body = request_body(&wire, request)?;
        if request.stream
            && self.supports_json_schema()
            && let serde_json::Value::Object(map) = &mut body
        {
            map.insert("stream_options".to_owned(), serde_json::json!({"include_usage": true}));
        }
        Ok(body)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.wire_request(request)?;
        let response = send_with_retry(self.name, self.max_retries, || self.request(&request.model, &body)).await?;
        let wire_response: OpenAiResponse = parse_json(response).await?;

        Ok(wire_response.into())
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<EventStream, LlmError> {
        let mut request = request.clone();
        request.stream = true;
        let body = self.wire_request(&request)?;
        let response = send_with_retry(self.name, self.max_retries, || self.request(&request.model, &body)).await?;

        Ok(sse_event_stream::<OpenAiStreamChunk, _>(response, openai_chunk_to_events))
    }
}
