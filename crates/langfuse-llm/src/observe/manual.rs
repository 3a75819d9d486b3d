//! Manual trace creation for providers the callback protocol cannot see

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use langfuse_core::{AuthCheck, EventIngestor, EventType, IngestOptions, IngestionEvent};
use serde_json::{Map, Value, json};

use crate::error::LlmError;

/// Project used when neither the caller nor the configuration names one
pub const DEFAULT_MANUAL_TRACE_PROJECT: &str = "powerrag-default-project";

/// Environment substituted for reserved or oversized environment names
pub const FALLBACK_ENVIRONMENT: &str = "prompt-experiment";

const RESERVED_ENVIRONMENT_PREFIX: &str = "langfuse";
const MAX_ENVIRONMENT_LEN: usize = 40;
const PROVIDER: &str = "PowerRAG";

/// A trace assembled outside the callback protocol
#[derive(Debug, Clone)]
pub struct ManualTrace {
    /// Trace id supplied by the caller
    pub trace_id: String,
    /// Trace name
    pub name: String,
    /// Trace input
    pub input: Value,
    /// Trace output
    pub output: Value,
    /// Environment tag, sanitized before submission
    pub environment: String,
    /// Project owning the trace
    pub project_id: Option<String>,
    /// When the traced call started, `now` if unknown
    pub start_time: Option<DateTime<Utc>>,
    /// When the traced call ended, `now` if unknown
    pub end_time: Option<DateTime<Utc>>,
    /// Caller metadata merged into the trace body
    pub metadata: Map<String, Value>,
}

/// Render `instant` as UTC+8 wall-clock time with a fixed `+08:00` suffix
pub fn format_utc8(instant: DateTime<Utc>) -> String {
    let shifted = instant + TimeDelta::hours(8);
    format!("{}+08:00", shifted.format("%Y-%m-%dT%H:%M:%S%.3f"))
}

/// Replace environment names the ingestion pipeline would reject
///
/// Names starting with `langfuse` or longer than 40 characters become
/// [`FALLBACK_ENVIRONMENT`]. Empty names pass through untouched.
pub fn sanitize_environment(environment: &str) -> String {
    if environment.is_empty() {
        return String::new();
    }

    if environment.starts_with(RESERVED_ENVIRONMENT_PREFIX) || environment.chars().count() > MAX_ENVIRONMENT_LEN {
        tracing::warn!(
            original = %environment,
            replacement = FALLBACK_ENVIRONMENT,
            "environment name is reserved or too long, replacing"
        );
        return FALLBACK_ENVIRONMENT.to_owned();
    }

    environment.to_owned()
}

fn iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the single `trace-create` event describing `trace`
pub fn build_trace_event(trace: &ManualTrace, now: DateTime<Utc>) -> IngestionEvent {
    let start = trace.start_time.unwrap_or(now);
    let end = trace.end_time.unwrap_or(now);
    let timestamp = format_utc8(now);

    let mut metadata = trace.metadata.clone();
    metadata.insert("manualTracing".to_owned(), Value::Bool(true));
    metadata.insert("provider".to_owned(), json!(PROVIDER));
    metadata.insert("createdAt".to_owned(), json!(timestamp));
    metadata.insert("duration".to_owned(), json!((end - start).num_milliseconds()));
    metadata.insert("startTime".to_owned(), json!(iso(start)));
    metadata.insert("endTime".to_owned(), json!(iso(end)));

    IngestionEvent {
        id: uuid::Uuid::new_v4().to_string(),
        event_type: EventType::TraceCreate,
        timestamp: timestamp.clone(),
        metadata: Some(json!({
            "manualTracing": true,
            "provider": PROVIDER,
            "createdAt": timestamp,
        })),
        body: json!({
            "id": trace.trace_id,
            "timestamp": timestamp,
            "name": trace.name,
            "input": trace.input,
            "output": trace.output,
            "environment": sanitize_environment(&trace.environment),
            "startTime": iso(start),
            "endTime": iso(end),
            "metadata": metadata,
            "public": false,
            "tags": ["powerrag", "manual-tracing"],
        }),
    }
}

/// Submit `trace` as a single `trace-create` event
///
/// The project falls back to `default_project` and then to
/// [`DEFAULT_MANUAL_TRACE_PROJECT`].
///
/// # Errors
///
/// Returns an error if the ingestor fails or rejects the event
pub async fn create_manual_trace(
    ingestor: &dyn EventIngestor,
    trace: &ManualTrace,
    default_project: Option<&str>,
) -> Result<(), LlmError> {
    let project_id = trace
        .project_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .or(default_project)
        .unwrap_or(DEFAULT_MANUAL_TRACE_PROJECT);

    let event = build_trace_event(trace, Utc::now());
    let event_id = event.id.clone();
    let auth = AuthCheck::project(project_id);

    tracing::info!(
        trace_id = %trace.trace_id,
        event_id = %event_id,
        project_id = %project_id,
        name = %trace.name,
        "creating manual trace"
    );

    let result = ingestor
        .process_event_batch(
            vec![event],
            &auth,
            IngestOptions {
                is_langfuse_internal: false,
            },
        )
        .await
        .map_err(|e| {
            tracing::error!(trace_id = %trace.trace_id, project_id = %project_id, error = %e, "manual trace submission failed");
            LlmError::Internal(e.into())
        })?;

    if let Some(failure) = result.first_error() {
        let message = match (&failure.error, &failure.message) {
            (Some(Value::String(error)), _) => error.clone(),
            (Some(error), _) => error.to_string(),
            (None, Some(message)) => message.clone(),
            (None, None) => "unknown error".to_owned(),
        };
        tracing::error!(
            trace_id = %trace.trace_id,
            event_id = %event_id,
            status = failure.status,
            error = %message,
            "manual trace rejected"
        );
        return Err(LlmError::TraceRejected {
            message,
            status: failure.status,
        });
    }

    tracing::info!(trace_id = %trace.trace_id, event_id = %event_id, "manual trace created");
    Ok(())
}
