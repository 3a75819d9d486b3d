//! In-memory ingestion pipeline for integration tests

use std::sync::Mutex;

use async_trait::async_trait;
use langfuse_core::{
    AuthCheck, BatchResult, EventIngestor, EventType, IngestError, IngestFailure, IngestOptions, IngestSuccess,
    IngestionEvent,
};

/// One submitted batch
#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub events: Vec<IngestionEvent>,
    pub project_id: String,
    pub internal: bool,
}

/// Ingestor that keeps every batch it receives
#[derive(Debug, Default)]
pub struct RecordingIngestor {
    batches: Mutex<Vec<RecordedBatch>>,
    reject: bool,
}

impl RecordingIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An ingestor that answers every event with a 400 rejection
    pub fn rejecting() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().unwrap().clone()
    }

    /// Every event across batches, in submission order
    pub fn events(&self) -> Vec<IngestionEvent> {
        self.batches().into_iter().flat_map(|b| b.events).collect()
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }
}

#[async_trait]
impl EventIngestor for RecordingIngestor {
    async fn process_event_batch(
        &self,
        events: Vec<IngestionEvent>,
        auth: &AuthCheck,
        options: IngestOptions,
    ) -> Result<BatchResult, IngestError> {
        let result = if self.reject {
            BatchResult {
                successes: Vec::new(),
                errors: events
                    .iter()
                    .map(|e| IngestFailure {
                        id: e.id.clone(),
                        status: 400,
                        message: Some("invalid body".to_owned()),
                        error: None,
                    })
                    .collect(),
            }
        } else {
            BatchResult {
                successes: events
                    .iter()
                    .map(|e| IngestSuccess {
                        id: e.id.clone(),
                        status: 201,
                    })
                    .collect(),
                errors: Vec::new(),
            }
        };

        self.batches.lock().unwrap().push(RecordedBatch {
            events,
            project_id: auth.scope.project_id.clone(),
            internal: options.is_langfuse_internal,
        });
        Ok(result)
    }
}
