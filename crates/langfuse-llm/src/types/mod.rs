//! Provider-agnostic types
//!
//! `chat` and `params` describe what callers hand in. The remaining modules
//! are the canonical request/response shapes every vendor protocol converts
//! to and from.

pub mod chat;
pub mod message;
pub mod params;
pub mod request;
pub mod response;
pub mod stream;
pub mod tool;

pub use chat::{ChatMessage, ChatMessageRole, ChatMessageType, LlmToolCall, ToolCallResponse};
pub use message::{FunctionCall, Message, Role, ToolCall};
pub use params::{LlmAdapter, LlmCompletionParams, ModelParams, TraceParams};
pub use request::{CompletionParams, CompletionRequest, StructuredOutput};
pub use response::{Choice, ChoiceMessage, CompletionResponse, FinishReason, Usage};
pub use stream::{StreamDelta, StreamEvent};
pub use tool::{FunctionDefinition, ToolChoice, ToolDefinition};
