#![allow(clippy::must_use_candidate)]

mod env;
pub mod ingestion;
pub mod llm;
mod loader;
pub mod telemetry;

use serde::Deserialize;

pub use ingestion::*;
pub use llm::*;
pub use telemetry::TelemetryConfig;

/// Top-level configuration for the LLM adapter layer
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Vendor transport and PowerRAG settings
    #[serde(default)]
    pub llm: LlmConfig,
    /// Where traced events are delivered
    #[serde(default)]
    pub ingestion: IngestionConfig,
    /// Logging and trace export
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
