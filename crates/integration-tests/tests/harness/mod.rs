#![allow(dead_code)]

pub mod ingest;
pub mod mock_llm;
pub mod mock_powerrag;

use std::sync::Arc;

use langfuse_config::LlmConfig;
use langfuse_core::{AuthCheck, EventIngestor};
use langfuse_llm::{ChatMessage, LlmAdapter, LlmCompletionParams, LlmService, ModelParams, TraceParams};
use secrecy::SecretString;

/// Service with default settings, recording into `ingestor`
pub fn service(ingestor: Arc<dyn EventIngestor>) -> LlmService {
    LlmService::new(&LlmConfig::default(), ingestor, Some("project-default".to_owned())).unwrap()
}

/// Parameters for an `OpenAI`-compatible call against `base_url`
pub fn openai_params(base_url: &str, messages: Vec<ChatMessage>) -> LlmCompletionParams {
    let mut params = LlmCompletionParams::new(
        messages,
        ModelParams::new(LlmAdapter::OpenAi, "openai", "mock-model-1"),
        SecretString::from("sk-test"),
    );
    params.base_url = Some(base_url.to_owned());
    params.max_retries = Some(0);
    params
}

/// Parameters for a PowerRAG call against `endpoint`
pub fn powerrag_params(endpoint: &str, messages: Vec<ChatMessage>) -> LlmCompletionParams {
    let mut params = LlmCompletionParams::new(
        messages,
        ModelParams::new(LlmAdapter::PowerRag, "powerrag", "powerrag-kb"),
        SecretString::from("app-key"),
    );
    params.base_url = Some(endpoint.to_owned());
    params
}

/// Trace parameters for project `project-1`
pub fn trace_params(trace_id: &str) -> TraceParams {
    TraceParams {
        project_id: "project-1".to_owned(),
        trace_id: trace_id.to_owned(),
        trace_name: None,
        environment: "langfuse-prompt-experiment".to_owned(),
        auth_check: AuthCheck::project("project-1"),
        token_counter: None,
    }
}
