//! Shared contracts for the Langfuse LLM adapter layer
//!
//! Types exchanged with collaborators that live outside the adapter: the
//! event-ingestion pipeline, key decryption, and HTTP status mapping.

#![allow(clippy::must_use_candidate)]

mod decrypt;
mod error;
pub mod ingestion;

pub use decrypt::{DecryptError, KeyDecryptor};
pub use error::HttpError;
pub use ingestion::{
    AccessLevel, ApiScope, AuthCheck, BatchResult, EventIngestor, EventType, IngestError, IngestFailure,
    IngestOptions, IngestSuccess, IngestionEvent, LoggingIngestor, public_api::HttpIngestor,
};
