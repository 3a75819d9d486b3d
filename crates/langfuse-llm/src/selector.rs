//! Builds the vendor client for an adapter

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::bedrock::BedrockProvider;
use crate::provider::google::GoogleProvider;
use crate::provider::openai::{OpenAiFlavor, OpenAiProvider};
use crate::provider::{HttpTransport, Provider, ProviderSettings};
use crate::types::LlmAdapter;

/// Outcome of adapter selection
pub enum Selected {
    /// A vendor client driven by the completion executor
    Provider(Box<dyn Provider>),
    /// The PowerRAG path, which bypasses the executor
    PowerRag,
}

impl std::fmt::Debug for Selected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provider(provider) => f.debug_tuple("Provider").field(&provider.name()).finish(),
            Self::PowerRag => f.write_str("PowerRag"),
        }
    }
}

/// Parse an adapter name received at an untyped boundary
///
/// # Errors
///
/// Returns `LlmError::InvalidRequest` naming the unsupported provider
pub fn parse_adapter(name: &str) -> Result<LlmAdapter, LlmError> {
    LlmAdapter::from_str(name)
        .map_err(|_| LlmError::InvalidRequest(format!("This model provider is not supported: {name}")))
}

/// Construct the client for `adapter`
///
/// `config` is the adapter-specific blob (Bedrock region, Vertex
/// location). `is_cloud` forbids the Bedrock default credential chain.
///
/// # Errors
///
/// Returns an error if credentials or the config blob cannot be parsed
pub async fn select(
    adapter: LlmAdapter,
    transport: &HttpTransport,
    settings: ProviderSettings,
    config: Option<&Map<String, Value>>,
    is_cloud: bool,
) -> Result<Selected, LlmError> {
    tracing::debug!(adapter = %adapter, settings = ?settings, "building vendor client");

    let provider: Box<dyn Provider> = match adapter {
        LlmAdapter::OpenAi => Box::new(OpenAiProvider::new(transport, OpenAiFlavor::OpenAi, settings)?),
        LlmAdapter::Azure => Box::new(OpenAiProvider::new(transport, OpenAiFlavor::Azure, settings)?),
        LlmAdapter::Anthropic => Box::new(AnthropicProvider::new(transport, settings)),
        LlmAdapter::Bedrock => Box::new(BedrockProvider::new(transport, config, settings, is_cloud).await?),
        LlmAdapter::VertexAi => Box::new(GoogleProvider::vertex(transport, config, settings)?),
        LlmAdapter::GoogleAiStudio => Box::new(GoogleProvider::ai_studio(transport, settings)),
        LlmAdapter::PowerRag => return Ok(Selected::PowerRag),
    };

    Ok(Selected::Provider(provider))
}
