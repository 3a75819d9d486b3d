//! Completion entry point
//!
//! [`LlmService`] normalizes messages, selects the adapter, runs the
//! executor (or the PowerRAG path) and wires up tracing for one call.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::Stream;
use langfuse_config::{Config, LlmConfig};
use langfuse_core::{AuthCheck, EventIngestor, IngestOptions};
use serde_json::{Value, json};

use crate::error::LlmError;
use crate::executor::{self, Execution};
use crate::normalize::normalize;
use crate::observe::{CompletionCallback, LocalTraceHandler, RunInfo};
use crate::powerrag::{PowerRagCall, PowerRagClient};
use crate::provider::{HttpTransport, ProviderSettings};
use crate::selector::{self, Selected};
use crate::types::{LlmCompletionParams, ToolCallResponse};

/// Text bytes of a streamed completion, single pass
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// The value produced by a completion call
pub enum Completion {
    /// Full text
    Text(String),
    /// Lazily produced text bytes
    Stream(ByteStream),
    /// JSON matching the caller's schema
    Structured(Value),
    /// Tool calls chosen by the model
    ToolCall(ToolCallResponse),
}

impl Completion {
    /// Empty text, returned for suppressed failures
    pub const fn empty() -> Self {
        Self::Text(String::new())
    }

    /// Text of a [`Completion::Text`]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Structured(value) => f.debug_tuple("Structured").field(value).finish(),
            Self::ToolCall(response) => f.debug_tuple("ToolCall").field(response).finish(),
        }
    }
}

/// Events buffered by the trace handler of one call
///
/// Call [`process`](Self::process) once the completion is available (for
/// streams, once drained) to forward them to the ingestion pipeline.
pub struct TracedEvents {
    inner: Option<TracedInner>,
}

struct TracedInner {
    handler: Arc<LocalTraceHandler>,
    ingestor: Arc<dyn EventIngestor>,
    auth: AuthCheck,
    project_id: String,
}

impl TracedEvents {
    /// No tracing for this call
    pub const fn none() -> Self {
        Self { inner: None }
    }

    /// Whether the call was traced
    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Export buffered events and hand them to the ingestor
    ///
    /// Failures are logged and never returned. Each event is sent at most
    /// once, so repeated calls only forward events recorded since.
    pub async fn process(&self) {
        let Some(inner) = &self.inner else {
            return;
        };

        let events = inner.handler.export();
        if events.is_empty() {
            return;
        }

        let count = events.len();
        match inner
            .ingestor
            .process_event_batch(
                events,
                &inner.auth,
                IngestOptions {
                    is_langfuse_internal: true,
                },
            )
            .await
        {
            Ok(result) => {
                if let Some(failure) = result.first_error() {
                    tracing::error!(
                        project_id = %inner.project_id,
                        rejected = result.errors.len(),
                        status = failure.status,
                        "traced events partially rejected"
                    );
                } else {
                    tracing::debug!(project_id = %inner.project_id, events = count, "traced events processed");
                }
            }
            Err(e) => {
                tracing::error!(project_id = %inner.project_id, error = %e, "failed to process traced events");
            }
        }
    }
}

impl std::fmt::Debug for TracedEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracedEvents")
            .field("project_id", &self.inner.as_ref().map(|i| &i.project_id))
            .finish()
    }
}

/// Result of [`LlmService::fetch_llm_completion`]
#[derive(Debug)]
pub struct LlmCompletion {
    /// The completion value
    pub completion: Completion,
    /// Flush hook for trace events
    pub traced_events: TracedEvents,
}

/// Entry point for completion calls
///
/// Holds the process-wide HTTP transport, so one instance serves every call.
pub struct LlmService {
    transport: HttpTransport,
    power_rag: PowerRagClient,
    ingestor: Arc<dyn EventIngestor>,
    default_max_retries: u32,
    is_cloud: bool,
}

impl std::fmt::Debug for LlmService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmService")
            .field("power_rag", &self.power_rag)
            .field("default_max_retries", &self.default_max_retries)
            .field("is_cloud", &self.is_cloud)
            .finish_non_exhaustive()
    }
}

impl LlmService {
    /// Build the service from the `[llm]` section
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built
    pub fn new(
        config: &LlmConfig,
        ingestor: Arc<dyn EventIngestor>,
        default_project: Option<String>,
    ) -> Result<Self, LlmError> {
        let transport = HttpTransport::from_config(config)?;
        let power_rag = PowerRagClient::new(&transport, &config.power_rag, Arc::clone(&ingestor), default_project);

        Ok(Self {
            transport,
            power_rag,
            ingestor,
            default_max_retries: config.default_max_retries,
            is_cloud: config.is_cloud(),
        })
    }

    /// Build the service from a full configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be built
    pub fn from_config(config: &Config, ingestor: Arc<dyn EventIngestor>) -> Result<Self, LlmError> {
        Self::new(&config.llm, ingestor, config.ingestion.default_project_id.clone())
    }

    /// Produce one completion
    ///
    /// Validation errors are always returned. Vendor failures are returned
    /// when `throw_on_error` is set and otherwise become an empty text
    /// completion.
    ///
    /// # Errors
    ///
    /// See above
    pub async fn fetch_llm_completion(&self, params: LlmCompletionParams) -> Result<LlmCompletion, LlmError> {
        if params.structured_output_schema.is_some() && !params.tools.is_empty() {
            return Err(LlmError::InvalidRequest(
                "structured output and tools cannot be combined".to_owned(),
            ));
        }

        let mut callbacks = params.callbacks.clone();
        let traced_events = match &params.trace_params {
            Some(trace_params) => {
                let handler = Arc::new(LocalTraceHandler::new(trace_params));
                callbacks.push(Arc::clone(&handler) as Arc<dyn CompletionCallback>);
                TracedEvents {
                    inner: Some(TracedInner {
                        handler,
                        ingestor: Arc::clone(&self.ingestor),
                        auth: trace_params.auth_check.clone(),
                        project_id: trace_params.project_id.clone(),
                    }),
                }
            }
            None => TracedEvents::none(),
        };

        let model_params = &params.model_params;
        let messages = normalize(&params.messages, model_params.adapter);
        let settings = ProviderSettings {
            api_key: params.api_key.clone(),
            base_url: params.base_url.clone(),
            extra_headers: params.extra_headers.clone(),
            max_retries: params.max_retries.unwrap_or(self.default_max_retries),
        };

        let selected = selector::select(
            model_params.adapter,
            &self.transport,
            settings,
            params.config.as_ref(),
            self.is_cloud,
        )
        .await?;

        let outcome = match selected {
            Selected::PowerRag => self
                .power_rag
                .complete(PowerRagCall {
                    messages: &messages,
                    api_key: &params.api_key,
                    base_url: params.base_url.as_deref(),
                    extra_headers: &params.extra_headers,
                    streaming: params.streaming,
                    callbacks: &callbacks,
                    model_params,
                    trace_params: params.trace_params.as_ref(),
                })
                .await
                .map(Completion::Text),
            Selected::Provider(provider) => {
                executor::execute(Execution {
                    provider: provider.as_ref(),
                    params: &params,
                    messages,
                    callbacks,
                    run: run_info(&params),
                })
                .await
            }
        };

        match outcome {
            Ok(completion) => Ok(LlmCompletion {
                completion,
                traced_events,
            }),
            Err(error) => {
                tracing::error!(
                    model = %model_params.model,
                    provider = %model_params.provider,
                    adapter = %model_params.adapter,
                    error = %error,
                    "completion failed"
                );

                if params.throw_on_error || error.is_validation() {
                    Err(error)
                } else {
                    Ok(LlmCompletion {
                        completion: Completion::empty(),
                        traced_events,
                    })
                }
            }
        }
    }
}

fn run_info(params: &LlmCompletionParams) -> RunInfo {
    let model_params = &params.model_params;
    RunInfo {
        run_id: params
            .trace_params
            .as_ref()
            .map_or_else(|| uuid::Uuid::new_v4().to_string(), |t| t.trace_id.clone()),
        run_name: params.trace_params.as_ref().and_then(|t| t.trace_name.clone()),
        model: model_params.model.clone(),
        provider: model_params.provider.clone(),
        adapter: model_params.adapter,
        model_parameters: json!({
            "temperature": model_params.temperature,
            "max_tokens": model_params.max_tokens,
            "top_p": model_params.top_p,
        }),
        streaming: params.streaming,
    }
}
