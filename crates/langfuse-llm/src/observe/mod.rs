//! Observability hooks around a completion call
//!
//! Callers observe a call through [`CompletionCallback`]. When trace
//! parameters are supplied the service appends a [`LocalTraceHandler`] that
//! buffers ingestion events until the caller flushes them.

pub mod handler;
pub mod manual;
mod tokens;

use async_trait::async_trait;
use serde_json::Value;

pub use handler::LocalTraceHandler;
pub use tokens::TiktokenCounter;

use crate::error::LlmError;
use crate::types::{LlmAdapter, Usage};

/// Identity and settings of one completion run, as seen by callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    /// Run identifier
    ///
    /// Traced calls reuse the trace id, so every run of one trace shares
    /// it. Untraced calls get a fresh v4 uuid per call.
    pub run_id: String,
    /// Run name; the trace name when trace parameters are present
    pub run_name: Option<String>,
    /// Model name
    pub model: String,
    /// Provider label
    pub provider: String,
    /// Adapter handling the call
    pub adapter: LlmAdapter,
    /// Sampling parameters sent to the vendor
    pub model_parameters: Value,
    /// Whether the caller asked for a stream
    pub streaming: bool,
}

/// Observer notified at the start, end and failure of a completion
///
/// Implementations may fail; the service logs callback failures and
/// carries on with the completion.
#[async_trait]
pub trait CompletionCallback: Send + Sync {
    /// Called before the vendor is invoked, with the normalized input
    async fn on_llm_start(&self, run: &RunInfo, input: &Value) -> anyhow::Result<()>;

    /// Called with the final output and vendor-reported usage, if any
    async fn on_llm_end(&self, run: &RunInfo, output: &Value, usage: Option<Usage>) -> anyhow::Result<()>;

    /// Called when the vendor call fails
    async fn on_llm_error(&self, run: &RunInfo, error: &LlmError) -> anyhow::Result<()>;
}

/// Token-count delegate used when a vendor reports no usage
pub trait TokenCounter: Send + Sync {
    /// Count tokens of `text` for `model`, or `None` if the model is unknown
    fn count(&self, model: &str, text: &str) -> Option<u32>;
}

impl<F> TokenCounter for F
where
    F: Fn(&str, &str) -> Option<u32> + Send + Sync,
{
    fn count(&self, model: &str, text: &str) -> Option<u32> {
        self(model, text)
    }
}

/// Notify every callback that a run started, logging failures
pub(crate) async fn notify_start(callbacks: &[std::sync::Arc<dyn CompletionCallback>], run: &RunInfo, input: &Value) {
    for callback in callbacks {
        if let Err(e) = callback.on_llm_start(run, input).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "completion callback failed on start");
        }
    }
}

/// Notify every callback that a run finished, logging failures
pub(crate) async fn notify_end(
    callbacks: &[std::sync::Arc<dyn CompletionCallback>],
    run: &RunInfo,
    output: &Value,
    usage: Option<Usage>,
) {
    for callback in callbacks {
        if let Err(e) = callback.on_llm_end(run, output, usage).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "completion callback failed on end");
        }
    }
}

/// Notify every callback that a run failed, logging failures
pub(crate) async fn notify_error(
    callbacks: &[std::sync::Arc<dyn CompletionCallback>],
    run: &RunInfo,
    error: &LlmError,
) {
    for callback in callbacks {
        if let Err(e) = callback.on_llm_error(run, error).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "completion callback failed on error");
        }
    }
}
