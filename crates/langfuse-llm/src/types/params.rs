use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use langfuse_core::AuthCheck;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

use super::chat::ChatMessage;
use super::tool::FunctionDefinition;
use crate::observe::{CompletionCallback, TokenCounter};

/// Vendor family handling a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum LlmAdapter {
    /// `OpenAI` and OpenAI-compatible APIs
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
    /// Azure `OpenAI` deployments
    #[serde(rename = "azure")]
    #[strum(serialize = "azure")]
    Azure,
    /// Anthropic Messages API
    #[serde(rename = "anthropic")]
    #[strum(serialize = "anthropic")]
    Anthropic,
    /// AWS Bedrock Converse
    #[serde(rename = "bedrock")]
    #[strum(serialize = "bedrock")]
    Bedrock,
    /// Google Vertex AI
    #[serde(rename = "google-vertex-ai")]
    #[strum(serialize = "google-vertex-ai")]
    VertexAi,
    /// Google AI Studio
    #[serde(rename = "google-ai-studio")]
    #[strum(serialize = "google-ai-studio")]
    GoogleAiStudio,
    /// Self-hosted PowerRAG chat-messages API
    #[serde(rename = "powerrag")]
    #[strum(serialize = "powerrag")]
    PowerRag,
}

/// Model selection and sampling parameters for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    /// Vendor family
    pub adapter: LlmAdapter,
    /// Business identifier of the provider entry
    pub provider: String,
    /// Vendor model name
    pub model: String,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate
    #[serde(default, rename = "max_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling threshold
    #[serde(default, rename = "top_p", skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Vendor-specific fields passed through untouched
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_options: Map<String, Value>,
}

impl ModelParams {
    /// Parameters with no sampling overrides
    pub fn new(adapter: LlmAdapter, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            adapter,
            provider: provider.into(),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            top_p: None,
            provider_options: Map::new(),
        }
    }
}

/// Enables tracing for a call
#[derive(Clone)]
pub struct TraceParams {
    /// Project owning the trace
    pub project_id: String,
    /// Trace identifier, reused verbatim for every emitted event
    pub trace_id: String,
    /// Trace name
    pub trace_name: Option<String>,
    /// Environment tag
    pub environment: String,
    /// Scope under which traced events are ingested
    pub auth_check: AuthCheck,
    /// Counts tokens when the vendor reports no usage
    pub token_counter: Option<Arc<dyn TokenCounter>>,
}

impl fmt::Debug for TraceParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceParams")
            .field("project_id", &self.project_id)
            .field("trace_id", &self.trace_id)
            .field("trace_name", &self.trace_name)
            .field("environment", &self.environment)
            .field("has_token_counter", &self.token_counter.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything needed to produce one completion
pub struct LlmCompletionParams {
    /// Conversation
    pub messages: Vec<ChatMessage>,
    /// Model and sampling parameters
    pub model_params: ModelParams,
    /// Caller schema; selects structured-output mode
    pub structured_output_schema: Option<Value>,
    /// Tool declarations; selects tool-call mode
    pub tools: Vec<FunctionDefinition>,
    /// Selects streaming mode
    pub streaming: bool,
    /// Caller callbacks; a trace handler is appended when tracing is enabled
    pub callbacks: Vec<Arc<dyn CompletionCallback>>,
    /// Vendor credential, never logged
    pub api_key: SecretString,
    /// Overrides the vendor endpoint
    pub base_url: Option<String>,
    /// Extra request headers; values are never logged
    pub extra_headers: HashMap<String, String>,
    /// Vendor retry budget
    pub max_retries: Option<u32>,
    /// Adapter-specific config blob (Bedrock region, Vertex location)
    pub config: Option<Map<String, Value>>,
    /// Enables tracing
    pub trace_params: Option<TraceParams>,
    /// When false, vendor failures yield an empty completion instead of an error
    pub throw_on_error: bool,
}

impl LlmCompletionParams {
    /// Plain-text call with no tracing
    pub fn new(messages: Vec<ChatMessage>, model_params: ModelParams, api_key: SecretString) -> Self {
        Self {
            messages,
            model_params,
            structured_output_schema: None,
            tools: Vec::new(),
            streaming: false,
            callbacks: Vec::new(),
            api_key,
            base_url: None,
            extra_headers: HashMap::new(),
            max_retries: None,
            config: None,
            trace_params: None,
            throw_on_error: true,
        }
    }
}

impl fmt::Debug for LlmCompletionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.extra_headers.keys().map(String::as_str).collect();

        f.debug_struct("LlmCompletionParams")
            .field("messages", &self.messages.len())
            .field("model_params", &self.model_params)
            .field("has_structured_output", &self.structured_output_schema.is_some())
            .field("tools", &self.tools.len())
            .field("streaming", &self.streaming)
            .field("callbacks", &self.callbacks.len())
            .field("base_url", &self.base_url)
            .field("extra_headers", &header_names)
            .field("max_retries", &self.max_retries)
            .field("trace_params", &self.trace_params)
            .field("throw_on_error", &self.throw_on_error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use secrecy::SecretString;

    use super::*;

    #[test]
    fn adapter_names_round_trip_through_strum_and_serde() {
        assert_eq!(LlmAdapter::from_str("google-vertex-ai").unwrap(), LlmAdapter::VertexAi);
        assert_eq!(LlmAdapter::PowerRag.to_string(), "powerrag");
        let parsed: LlmAdapter = serde_json::from_str("\"google-ai-studio\"").unwrap();
        assert_eq!(parsed, LlmAdapter::GoogleAiStudio);
        assert!(LlmAdapter::from_str("cohere").is_err());
    }

    #[test]
    fn model_params_accept_snake_case_sampling_fields() {
        let params: ModelParams = serde_json::from_value(serde_json::json!({
            "adapter": "openai",
            "provider": "openai",
            "model": "gpt-4o-mini",
            "temperature": 0.2,
            "max_tokens": 256,
            "top_p": 0.9,
            "providerOptions": {"seed": 7}
        }))
        .unwrap();

        assert_eq!(params.max_tokens, Some(256));
        assert_eq!(params.provider_options["seed"], 7);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let mut params = LlmCompletionParams::new(
            vec![ChatMessage::user("hi")],
            ModelParams::new(LlmAdapter::OpenAi, "openai", "gpt-4o"),
            SecretString::from("sk-very-secret"),
        );
        params
            .extra_headers
            .insert("x-tenant-token".to_owned(), "tenant-secret".to_owned());

        let debug = format!("{params:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("tenant-secret"));
        assert!(debug.contains("x-tenant-token"));
    }
}
