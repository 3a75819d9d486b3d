//! PowerRAG chat-messages integration
//!
//! PowerRAG is called over plain HTTP rather than through a [`Provider`],
//! so the callback protocol never sees it. When trace parameters are
//! present the call is recorded with a manual trace instead.
//!
//! [`Provider`]: crate::provider::Provider

mod parse;
mod query;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use langfuse_config::PowerRagConfig;
use langfuse_core::EventIngestor;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Map, Value, json};

pub use parse::{parse_response, parse_sse};
pub use query::extract_query;

use crate::error::LlmError;
use crate::observe::manual::{ManualTrace, create_manual_trace};
use crate::observe::{CompletionCallback, RunInfo, notify_end, notify_error, notify_start};
use crate::provider::{HttpTransport, extra_header_map};
use crate::types::{LlmAdapter, Message, ModelParams, TraceParams};

/// Run id reported to callbacks when the caller supplied no trace id
pub const UNKNOWN_RUN_ID: &str = "powerrag-unknown";

const TRACE_NAME: &str = "PowerRAG Query";
const ERROR_TRACE_NAME: &str = "PowerRAG Query (Error)";
const PROVIDER: &str = "PowerRAG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum ResponseMode {
    Blocking,
    Streaming,
}

impl ResponseMode {
    /// Mode sent for the caller's streaming flag
    ///
    /// The mapping is inverted: a streaming caller gets a blocking call.
    const fn for_streaming(streaming: bool) -> Self {
        if streaming { Self::Blocking } else { Self::Streaming }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessagesRequest<'a> {
    inputs: Map<String, Value>,
    query: &'a str,
    response_mode: ResponseMode,
    conversation_id: &'a str,
    user: &'a str,
    files: Vec<Value>,
}

/// One PowerRAG completion
pub struct PowerRagCall<'a> {
    /// Normalized conversation
    pub messages: &'a [Message],
    /// Bearer token, omitted when blank
    pub api_key: &'a SecretString,
    /// Overrides the configured endpoint
    pub base_url: Option<&'a str>,
    /// Extra request headers
    pub extra_headers: &'a HashMap<String, String>,
    /// Caller streaming flag
    pub streaming: bool,
    /// Caller callbacks, used only without trace parameters
    pub callbacks: &'a [Arc<dyn CompletionCallback>],
    /// Model parameters recorded in trace metadata
    pub model_params: &'a ModelParams,
    /// Enables manual tracing
    pub trace_params: Option<&'a TraceParams>,
}

/// Client for the PowerRAG chat-messages API
pub struct PowerRagClient {
    client: Client,
    endpoint: String,
    user: String,
    ingestor: Arc<dyn EventIngestor>,
    default_project: Option<String>,
}

impl std::fmt::Debug for PowerRagClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerRagClient")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("default_project", &self.default_project)
            .finish_non_exhaustive()
    }
}

/// Identity of the trace a call records into
struct TraceTarget<'a> {
    params: &'a TraceParams,
    trace_id: &'a str,
}

impl PowerRagClient {
    /// Create a client from configuration
    pub fn new(
        transport: &HttpTransport,
        config: &PowerRagConfig,
        ingestor: Arc<dyn EventIngestor>,
        default_project: Option<String>,
    ) -> Self {
        Self {
            client: transport.power_rag_client().clone(),
            endpoint: config.endpoint(),
            user: config.user.clone(),
            ingestor,
            default_project,
        }
    }

    /// Configured chat-messages endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one query and return the answer text
    ///
    /// # Errors
    ///
    /// Returns an error if no query can be built, the request fails, or
    /// PowerRAG answers with a non-success status. Tracing failures are
    /// logged and never returned.
    pub async fn complete(&self, call: PowerRagCall<'_>) -> Result<String, LlmError> {
        let target = call
            .trace_params
            .filter(|p| !p.trace_id.is_empty())
            .map(|params| TraceTarget {
                params,
                trace_id: &params.trace_id,
            });
        if target.is_none() {
            tracing::warn!(
                has_trace_params = call.trace_params.is_some(),
                callbacks = call.callbacks.len(),
                "PowerRAG call has no trace id, manual trace disabled"
            );
        }

        let query = extract_query(call.messages)?;
        let url = call.base_url.filter(|u| !u.is_empty()).unwrap_or(&self.endpoint);
        let run = run_info(&call);
        let use_callbacks = target.is_none() && !call.callbacks.is_empty();

        tracing::info!(
            url = %url,
            streaming = call.streaming,
            trace_id = ?target.as_ref().map(|t| t.trace_id),
            query_length = query.len(),
            header_names = ?call.extra_headers.keys().collect::<Vec<_>>(),
            "PowerRAG request"
        );

        if target.is_some() {
            tracing::debug!("trace parameters present, callbacks skipped in favour of a manual trace");
        } else if use_callbacks {
            notify_start(call.callbacks, &run, &json!([query])).await;
        }

        let start = Utc::now();
        match self.send(&call, url, &query).await {
            Ok(completion) => {
                let end = Utc::now();

                if let Some(target) = &target {
                    let trace = manual_trace(target, &call, &query, Value::String(completion.clone()), (start, end), None);
                    if let Err(e) = create_manual_trace(self.ingestor.as_ref(), &trace, self.default_project.as_deref()).await {
                        tracing::error!(
                            trace_id = %target.trace_id,
                            project_id = %target.params.project_id,
                            error = %e,
                            "PowerRAG manual trace failed"
                        );
                    }
                } else if use_callbacks {
                    notify_end(call.callbacks, &run, &Value::String(completion.clone()), None).await;
                }

                tracing::info!(
                    trace_id = ?target.as_ref().map(|t| t.trace_id),
                    completion_length = completion.len(),
                    duration_ms = (end - start).num_milliseconds(),
                    "PowerRAG call complete"
                );
                Ok(completion)
            }
            Err(error) => {
                let end = Utc::now();

                if let Some(target) = &target {
                    let trace = manual_trace(target, &call, &query, Value::Null, (start, end), Some(&error));
                    if let Err(e) = create_manual_trace(self.ingestor.as_ref(), &trace, self.default_project.as_deref()).await {
                        tracing::error!(
                            trace_id = %target.trace_id,
                            project_id = %target.params.project_id,
                            error = %e,
                            original_error = %error,
                            "PowerRAG error trace failed"
                        );
                    }
                } else if use_callbacks {
                    notify_error(call.callbacks, &run, &error).await;
                }

                let authorization = (!call.api_key.expose_secret().trim().is_empty()).then_some("Bearer ***");
                tracing::error!(
                    error = %error,
                    url = %url,
                    authorization = ?authorization,
                    header_names = ?call.extra_headers.keys().collect::<Vec<_>>(),
                    query = %preview(&query, 100),
                    streaming = call.streaming,
                    duration_ms = (end - start).num_milliseconds(),
                    "PowerRAG API call failed"
                );
                Err(error)
            }
        }
    }

    async fn send(&self, call: &PowerRagCall<'_>, url: &str, query: &str) -> Result<String, LlmError> {
        let payload = ChatMessagesRequest {
            inputs: Map::new(),
            query,
            response_mode: ResponseMode::for_streaming(call.streaming),
            conversation_id: "",
            user: &self.user,
            files: Vec::new(),
        };

        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .headers(extra_header_map(call.extra_headers));
        let api_key = call.api_key.expose_secret();
        if api_key.trim().is_empty() {
            tracing::warn!("PowerRAG API key is empty or not provided");
        } else {
            request = request.bearer_auth(api_key);
        }

        let response = request.json(&payload).send().await.map_err(|e| LlmError::Upstream {
            status: None,
            message: format!("PowerRAG request failed: {e}"),
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::Upstream {
            status: Some(status.as_u16()),
            message: format!("failed to read PowerRAG response: {e}"),
        })?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %preview(&text, 500), url = %url, "PowerRAG API error response");
            return Err(LlmError::PowerRag {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_owned(),
                body: text,
            });
        }

        tracing::debug!(status = status.as_u16(), length = text.len(), preview = %preview(&text, 200), "PowerRAG API response");
        Ok(parse_response(&text, call.streaming))
    }
}

fn manual_trace(
    target: &TraceTarget<'_>,
    call: &PowerRagCall<'_>,
    query: &str,
    output: Value,
    (start, end): (DateTime<Utc>, DateTime<Utc>),
    error: Option<&LlmError>,
) -> ManualTrace {
    let mut metadata = Map::new();
    metadata.insert("provider".to_owned(), json!(PROVIDER));
    metadata.insert("model".to_owned(), json!(call.model_params.model));
    metadata.insert("adapter".to_owned(), json!(call.model_params.adapter.as_ref()));
    metadata.insert("streaming".to_owned(), json!(call.streaming));
    if let Some(error) = error {
        metadata.insert("error".to_owned(), Value::Bool(true));
        metadata.insert("errorMessage".to_owned(), json!(error.to_string()));
    }

    let default_name = if error.is_some() { ERROR_TRACE_NAME } else { TRACE_NAME };

    ManualTrace {
        trace_id: target.trace_id.to_owned(),
        name: target
            .params
            .trace_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_name.to_owned()),
        input: Value::String(query.to_owned()),
        output,
        environment: target.params.environment.clone(),
        project_id: Some(target.params.project_id.clone()),
        start_time: Some(start),
        end_time: Some(end),
        metadata,
    }
}

fn run_info(call: &PowerRagCall<'_>) -> RunInfo {
    let params = call.model_params;
    RunInfo {
        run_id: call
            .trace_params
            .map(|p| p.trace_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| UNKNOWN_RUN_ID.to_owned()),
        run_name: call.trace_params.and_then(|p| p.trace_name.clone()),
        model: params.model.clone(),
        provider: params.provider.clone(),
        adapter: LlmAdapter::PowerRag,
        model_parameters: json!({
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "top_p": params.top_p,
        }),
        streaming: call.streaming,
    }
}

fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() > limit {
        let head: String = text.chars().take(limit).collect();
        format!("{head}...")
    } else {
        text.to_owned()
    }
}
