//! Event-ingestion collaborator contract
//!
//! The adapter layer never persists observability data itself. It builds
//! ingestion events and hands them to an [`EventIngestor`], which owns
//! validation, storage and its own concurrency discipline.

pub mod public_api;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Kind of an ingestion event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    /// Create or upsert a trace
    TraceCreate,
    /// Create a generation observation
    GenerationCreate,
    /// Update an existing generation observation
    GenerationUpdate,
}

/// A single event in an ingestion batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionEvent {
    /// Event id, unique per event (not the trace id)
    pub id: String,
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Event timestamp as sent on the wire
    pub timestamp: String,
    /// Envelope metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Event body, shape depends on `event_type`
    pub body: Value,
}

/// Access level granted by an auth check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    /// Full project access
    Project,
    /// Score-only access
    Scores,
}

/// Scope of a validated key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiScope {
    /// Project the events belong to
    pub project_id: String,
    /// Granted access level
    pub access_level: AccessLevel,
}

/// Result of authenticating the origin of an event batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCheck {
    /// Whether the key was accepted
    pub valid_key: bool,
    /// Scope granted to the key
    pub scope: ApiScope,
}

impl AuthCheck {
    /// A pre-validated project-level auth context
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            valid_key: true,
            scope: ApiScope {
                project_id: project_id.into(),
                access_level: AccessLevel::Project,
            },
        }
    }
}

/// Options for a single batch submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Events were produced by Langfuse itself rather than by an SDK user
    pub is_langfuse_internal: bool,
}

/// An event the ingestor accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSuccess {
    /// Event id
    pub id: String,
    /// Per-event status code
    pub status: u16,
}

/// An event the ingestor rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    /// Event id
    pub id: String,
    /// Per-event status code
    pub status: u16,
    /// Human-readable reason
    #[serde(default)]
    pub message: Option<String>,
    /// Structured error details
    #[serde(default)]
    pub error: Option<Value>,
}

/// Outcome of a batch submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Accepted events
    #[serde(default)]
    pub successes: Vec<IngestSuccess>,
    /// Rejected events
    #[serde(default)]
    pub errors: Vec<IngestFailure>,
}

impl BatchResult {
    /// First rejection, if any
    pub fn first_error(&self) -> Option<&IngestFailure> {
        self.errors.first()
    }
}

/// Errors submitting a batch as a whole
#[derive(Debug, Error)]
pub enum IngestError {
    /// The batch could not be delivered
    #[error("ingestion transport error: {0}")]
    Transport(String),

    /// The ingestion endpoint refused the whole batch
    #[error("ingestion rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status returned
        status: u16,
        /// Response body
        body: String,
    },

    /// The response could not be decoded
    #[error("failed to decode ingestion response: {0}")]
    Decode(String),
}

/// Collaborator that accepts batches of ingestion events
#[async_trait]
pub trait EventIngestor: Send + Sync {
    /// Validate and store a batch of events on behalf of `auth`
    async fn process_event_batch(
        &self,
        events: Vec<IngestionEvent>,
        auth: &AuthCheck,
        options: IngestOptions,
    ) -> Result<BatchResult, IngestError>;
}

/// Ingestor that only logs events
///
/// Used when no ingestion endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingIngestor;

#[async_trait]
impl EventIngestor for LoggingIngestor {
    async fn process_event_batch(
        &self,
        events: Vec<IngestionEvent>,
        auth: &AuthCheck,
        options: IngestOptions,
    ) -> Result<BatchResult, IngestError> {
        let successes = events
            .into_iter()
            .map(|event| {
                tracing::debug!(
                    event_id = %event.id,
                    event_type = ?event.event_type,
                    project_id = %auth.scope.project_id,
                    internal = options.is_langfuse_internal,
                    body = %event.body,
                    "ingestion event"
                );
                IngestSuccess {
                    id: event.id,
                    status: 201,
                }
            })
            .collect();

        Ok(BatchResult {
            successes,
            errors: Vec::new(),
        })
    }
}
