//! LLM completion layer for Langfuse
//!
//! Turns a list of chat messages plus model parameters into a completion from
//! one of the supported vendors (`OpenAI`, Azure, Anthropic, Bedrock, Google
//! Vertex AI and AI Studio) or from a PowerRAG service. Completions come back
//! as plain text, a text stream, schema-validated JSON or tool calls, and can
//! be traced into the Langfuse ingestion pipeline.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod completion;
pub mod convert;
pub mod error;
mod executor;
pub mod normalize;
pub mod observe;
pub mod powerrag;
pub mod protocol;
pub mod provider;
pub mod selector;
pub mod structured;
pub mod types;
pub mod worker;

pub use completion::{ByteStream, Completion, LlmCompletion, LlmService, TracedEvents};
pub use error::LlmError;
pub use observe::{CompletionCallback, RunInfo, TiktokenCounter, TokenCounter};
pub use provider::{Provider, ProviderCapabilities};
pub use types::{ChatMessage, LlmAdapter, LlmCompletionParams, ModelParams, TraceParams};
pub use worker::{ApiError, LlmApiKey, LlmWorker, ModelConfig, compile_handlebar_string};
