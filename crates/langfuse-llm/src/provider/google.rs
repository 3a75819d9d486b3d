//! Gemini provider for Google AI Studio and Vertex AI

use async_trait::async_trait;
use http::header::HeaderMap;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use super::vertex_auth::VertexAuth;
use super::{
    EventStream, HttpTransport, Provider, ProviderCapabilities, ProviderSettings, extra_header_map, parse_json,
    send_with_retry, sse_event_stream,
};
use crate::convert::google::google_chunk_to_events;
use crate::error::LlmError;
use crate::protocol::google::{GoogleRequest, GoogleResponse};
use crate::types::{CompletionRequest, CompletionResponse};

/// Default Google AI Studio base URL
const AI_STUDIO_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Vertex AI location used when the adapter config names none
const DEFAULT_VERTEX_LOCATION: &str = "us-central1";

/// Where Gemini requests are sent and how they authenticate
pub enum GoogleEndpoint {
    /// AI Studio with an API key
    AiStudio {
        /// API key sent as `x-goog-api-key`
        api_key: SecretString,
    },
    /// Vertex AI with a service account
    Vertex {
        /// Token source
        auth: VertexAuth,
        /// Region, such as `us-central1`
        location: String,
    },
}

/// Gemini `generateContent` provider
pub struct GoogleProvider {
    client: Client,
    base_url: String,
    endpoint: GoogleEndpoint,
    headers: HeaderMap,
    max_retries: u32,
}

impl GoogleProvider {
    /// Create an AI Studio provider
    pub fn ai_studio(transport: &HttpTransport, settings: ProviderSettings) -> Self {
        let base_url = settings
            .base_url
            .filter(|url| !url.trim().is_empty())
            .map_or_else(|| AI_STUDIO_BASE_URL.to_owned(), |url| url.trim_end_matches('/').to_owned());

        Self {
            client: transport.client().clone(),
            base_url,
            endpoint: GoogleEndpoint::AiStudio {
                api_key: settings.api_key,
            },
            headers: extra_header_map(&settings.extra_headers),
            max_retries: settings.max_retries,
        }
    }

    /// Create a Vertex AI provider from a service-account key
    ///
    /// The adapter config may name a `location`.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidCredentials` if the API key is not a service-account key.
    pub fn vertex(
        transport: &HttpTransport,
        config: Option<&Map<String, Value>>,
        settings: ProviderSettings,
    ) -> Result<Self, LlmError> {
        let auth = VertexAuth::from_json(settings.api_key.expose_secret(), transport.client().clone())?;
        let location = config
            .and_then(|c| c.get("location"))
            .and_then(Value::as_str)
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(DEFAULT_VERTEX_LOCATION)
            .to_owned();

        let base_url = settings
            .base_url
            .filter(|url| !url.trim().is_empty())
            .map_or_else(
                || {
                    format!(
                        "https://{location}-aiplatform.googleapis.com/v1/projects/{}/locations/{location}/publishers/google",
                        auth.project_id()
                    )
                },
                |url| url.trim_end_matches('/').to_owned(),
            );

        Ok(Self {
            client: transport.client().clone(),
            base_url,
            endpoint: GoogleEndpoint::Vertex { auth, location },
            headers: extra_header_map(&settings.extra_headers),
            max_retries: settings.max_retries,
        })
    }

    fn url(&self, model: &str, stream: bool) -> String {
        if stream {
            format!("{}/models/{model}:streamGenerateContent?alt=sse", self.base_url)
        } else {
            format!("{}/models/{model}:generateContent", self.base_url)
        }
    }

    /// Resolve the auth header for this call
    async fn auth_header(&self) -> Result<(&'static str, String), LlmError> {
        match &self.endpoint {
            GoogleEndpoint::AiStudio { api_key } => Ok(("x-goog-api-key", api_key.expose_secret().to_owned())),
            GoogleEndpoint::Vertex { auth, .. } => {
                let token = auth.access_token().await?;
                Ok(("authorization", format!("Bearer {}", token.expose_secret())))
            }
        }
    }

    fn request(&self, url: &str, auth: &(&'static str, String), body: &Value) -> RequestBuilder {
        self.client
            .post(url)
            .header(auth.0, &auth.1)
            .headers(self.headers.clone())
            .json(body)
    }
}

/// Serialize a wire request and merge provider options into `generationConfig`
fn google_body(request: &CompletionRequest) -> Result<Value, LlmError> {
    let mut body = serde_json::to_value(GoogleRequest::from(request))
        .map_err(|e| anyhow::anyhow!("failed to encode request: {e}"))?;

    if !request.provider_options.is_empty()
        && let Value::Object(map) = &mut body
    {
        let config = map
            .entry("generationConfig")
            .or_insert_with(|| Value::Object(Map::new()));
        crate::types::request::merge_provider_options(config, &request.provider_options);
    }

    Ok(body)
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        match self.endpoint {
            GoogleEndpoint::AiStudio { .. } => "google-ai-studio",
            GoogleEndpoint::Vertex { .. } => "google-vertex-ai",
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            streaming: true,
            tool_calling: true,
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = google_body(request)?;
        let auth = self.auth_header().await?;
        let url = self.url(&request.model, false);
        let response = send_with_retry(self.name(), self.max_retries, || self.request(&url, &auth, &body)).await?;
        let wire_response: GoogleResponse = parse_json(response).await?;

        let mut response = CompletionResponse::from(wire_response);
        if response.model.is_empty() {
            response.model.clone_from(&request.model);
        }
        Ok(response)
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<EventStream, LlmError> {
        let body = google_body(request)?;
        let auth = self.auth_header().await?;
        let url = self.url(&request.model, true);
        let response = send_with_retry(self.name(), self.max_retries, || self.request(&url, &auth, &body)).await?;

        Ok(sse_event_stream::<GoogleResponse, _>(response, google_chunk_to_events))
    }
}
