use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::Message;
use super::tool::{ToolChoice, ToolDefinition};

/// Sampling parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Schema-constrained output request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    /// Name given to the schema (or the forced tool carrying it)
    pub name: String,
    /// JSON Schema the answer must satisfy
    pub schema: Value,
}

/// Canonical completion request sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Vendor model name
    pub model: String,
    /// Normalized conversation
    pub messages: Vec<Message>,
    /// Sampling parameters
    #[serde(default)]
    pub params: CompletionParams,
    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    /// Tool selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Schema-constrained output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<StructuredOutput>,
    /// Vendor-specific fields merged into the wire request
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub provider_options: Map<String, Value>,
    /// Whether a streamed response is requested
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    /// Request with no tools, schema or provider options
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            params: CompletionParams::default(),
            tools: None,
            tool_choice: None,
            structured_output: None,
            provider_options: Map::new(),
            stream: false,
        }
    }
}

/// Merge vendor options into a serialized wire request
///
/// Keys already produced by the conversion win, so options cannot
/// replace the model or the messages.
pub(crate) fn merge_provider_options(body: &mut Value, options: &Map<String, Value>) {
    if let Value::Object(map) = body {
        for (key, value) in options {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}
