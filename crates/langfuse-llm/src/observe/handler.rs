//! Callback handler that records a trace locally instead of sending it

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use langfuse_core::{EventType, IngestionEvent};
use serde_json::{Value, json};

use super::{CompletionCallback, RunInfo, TokenCounter};
use crate::error::LlmError;
use crate::types::{TraceParams, Usage};

/// Default generation name when the run carries none
const DEFAULT_GENERATION_NAME: &str = "ChatCompletion";

/// Buffers trace and generation events for a single completion call
///
/// Scoped to one call: the service creates it from the trace parameters,
/// the vendor call feeds it, and [`export`](Self::export) drains it.
pub struct LocalTraceHandler {
    trace_id: String,
    trace_name: Option<String>,
    environment: String,
    token_counter: Option<Arc<dyn TokenCounter>>,
    state: Mutex<HandlerState>,
}

#[derive(Default)]
struct HandlerState {
    events: Vec<IngestionEvent>,
    generations: HashMap<String, Generation>,
}

struct Generation {
    id: String,
    input_text: String,
}

impl LocalTraceHandler {
    /// Create a handler for one call
    pub fn new(params: &TraceParams) -> Self {
        Self {
            trace_id: params.trace_id.clone(),
            trace_name: params.trace_name.clone(),
            environment: params.environment.clone(),
            token_counter: params.token_counter.clone(),
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Drain the buffered events
    pub fn export(&self) -> Vec<IngestionEvent> {
        self.state
            .lock()
            .map(|mut state| std::mem::take(&mut state.events))
            .unwrap_or_default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HandlerState) -> T) -> anyhow::Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("trace buffer lock poisoned"))?;
        Ok(f(&mut state))
    }

    fn event(event_type: EventType, body: Value) -> IngestionEvent {
        IngestionEvent {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: now(),
            metadata: None,
            body,
        }
    }

    /// Usage from the vendor, else counted locally
    fn resolve_usage(&self, model: &str, input: &str, output: &str, usage: Option<Usage>) -> Option<Usage> {
        usage.or_else(|| {
            let counter = self.token_counter.as_ref()?;
            let prompt = counter.count(model, input)?;
            let completion = counter.count(model, output)?;
            Some(Usage::new(prompt, completion))
        })
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn as_text(value: &Value) -> String {
    value.as_str().map_or_else(|| value.to_string(), ToOwned::to_owned)
}

#[async_trait]
impl CompletionCallback for LocalTraceHandler {
    async fn on_llm_start(&self, run: &RunInfo, input: &Value) -> anyhow::Result<()> {
        let generation_id = uuid::Uuid::new_v4().to_string();
        let timestamp = now();

        let trace = Self::event(
            EventType::TraceCreate,
            json!({
                "id": self.trace_id,
                "timestamp": timestamp,
                "name": self.trace_name,
                "input": input,
                "environment": self.environment,
            }),
        );
        let generation = Self::event(
            EventType::GenerationCreate,
            json!({
                "id": generation_id,
                "traceId": self.trace_id,
                "name": run.run_name.as_deref().unwrap_or(DEFAULT_GENERATION_NAME),
                "startTime": timestamp,
                "model": run.model,
                "modelParameters": run.model_parameters,
                "input": input,
                "environment": self.environment,
                "metadata": {
                    "adapter": run.adapter.as_ref(),
                    "provider": run.provider,
                    "streaming": run.streaming,
                },
            }),
        );

        self.with_state(|state| {
            state.events.push(trace);
            state.events.push(generation);
            state.generations.insert(
                run.run_id.clone(),
                Generation {
                    id: generation_id,
                    input_text: as_text(input),
                },
            );
        })
    }

    async fn on_llm_end(&self, run: &RunInfo, output: &Value, usage: Option<Usage>) -> anyhow::Result<()> {
        let generation = self.with_state(|state| state.generations.remove(&run.run_id))?;
        let (generation_id, input_text) = generation.map_or_else(
            || (uuid::Uuid::new_v4().to_string(), String::new()),
            |g| (g.id, g.input_text),
        );

        let usage = self.resolve_usage(&run.model, &input_text, &as_text(output), usage);
        let usage_details = usage.map(|u| {
            json!({
                "input": u.prompt_tokens,
                "output": u.completion_tokens,
                "total": u.total_tokens,
            })
        });

        let update = Self::event(
            EventType::GenerationUpdate,
            json!({
                "id": generation_id,
                "traceId": self.trace_id,
                "endTime": now(),
                "output": output,
                "usageDetails": usage_details,
                "environment": self.environment,
            }),
        );
        let trace = Self::event(
            EventType::TraceCreate,
            json!({
                "id": self.trace_id,
                "output": output,
                "environment": self.environment,
            }),
        );

        self.with_state(|state| {
            state.events.push(update);
            state.events.push(trace);
        })
    }

    async fn on_llm_error(&self, run: &RunInfo, error: &LlmError) -> anyhow::Result<()> {
        let generation = self.with_state(|state| state.generations.remove(&run.run_id))?;
        let generation_id = generation.map_or_else(|| uuid::Uuid::new_v4().to_string(), |g| g.id);

        let update = Self::event(
            EventType::GenerationUpdate,
            json!({
                "id": generation_id,
                "traceId": self.trace_id,
                "endTime": now(),
                "level": "ERROR",
                "statusMessage": error.to_string(),
                "environment": self.environment,
            }),
        );

        self.with_state(|state| state.events.push(update))
    }
}
