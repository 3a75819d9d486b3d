use std::collections::HashMap;
use std::path::Path;

use langfuse_core::AuthCheck;
use langfuse_llm::types::FunctionDefinition;
use langfuse_llm::{ChatMessage, LlmCompletionParams, ModelParams, TraceParams};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Completion request read from disk
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFile {
    pub messages: Vec<ChatMessage>,
    pub model_params: ModelParams,
    pub api_key: SecretString,
    #[serde(default, rename = "baseURL")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
    #[serde(default)]
    pub tools: Vec<FunctionDefinition>,
    #[serde(default)]
    pub structured_output_schema: Option<Value>,
    #[serde(default)]
    pub trace_params: Option<TraceRequest>,
}

/// Trace settings of a request file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRequest {
    pub project_id: String,
    pub trace_id: String,
    #[serde(default)]
    pub trace_name: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_environment() -> String {
    "default".to_owned()
}

impl RequestFile {
    pub async fn read(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read request file {}: {e}", path.display()))?;
        serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("failed to parse request file: {e}"))
    }

    pub fn into_params(self, streaming: bool) -> LlmCompletionParams {
        let mut params = LlmCompletionParams::new(self.messages, self.model_params, self.api_key);
        params.base_url = self.base_url;
        params.extra_headers = self.extra_headers;
        params.max_retries = self.max_retries;
        params.config = self.config;
        params.tools = self.tools;
        params.structured_output_schema = self.structured_output_schema;
        params.streaming = streaming;
        params.trace_params = self.trace_params.map(|t| TraceParams {
            auth_check: AuthCheck::project(&t.project_id),
            project_id: t.project_id,
            trace_id: t.trace_id,
            trace_name: t.trace_name,
            environment: t.environment,
            token_counter: Some(std::sync::Arc::new(langfuse_llm::TiktokenCounter::default())),
        });
        params
    }
}
