use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author role of a caller-supplied message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageRole {
    /// End user
    User,
    /// System prompt
    System,
    /// Developer instruction, treated like a system prompt
    Developer,
    /// Model turn
    Assistant,
    /// Tool output
    Tool,
    /// Gemini-style model turn
    Model,
    /// Anything else is handled as an assistant turn
    #[serde(other)]
    Other,
}

/// Kind of a caller-supplied message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChatMessageType {
    /// Result of a tool invocation
    ToolResult,
    /// Assistant turn that requested tool calls
    AssistantToolCall,
    /// Ordinary text turn
    #[default]
    #[serde(other)]
    Default,
}

/// Provider-agnostic chat message, never mutated once built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Author role
    pub role: ChatMessageRole,
    /// Message kind
    #[serde(default, rename = "type")]
    pub message_type: ChatMessageType,
    /// Text or any structured value
    #[serde(default)]
    pub content: Value,
    /// Tool call answered by a tool-result message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Calls made by an assistant-tool-call message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<LlmToolCall>>,
}

impl ChatMessage {
    fn text(role: ChatMessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            message_type: ChatMessageType::Default,
            content: Value::String(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(ChatMessageRole::User, content)
    }

    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(ChatMessageRole::System, content)
    }

    /// Developer message
    pub fn developer(content: impl Into<String>) -> Self {
        Self::text(ChatMessageRole::Developer, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(ChatMessageRole::Assistant, content)
    }

    /// Tool result answering `tool_call_id`
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatMessageRole::Tool,
            message_type: ChatMessageType::ToolResult,
            content: Value::String(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    /// Assistant turn carrying tool calls
    pub fn assistant_tool_call(content: impl Into<String>, tool_calls: Vec<LlmToolCall>) -> Self {
        Self {
            role: ChatMessageRole::Assistant,
            message_type: ChatMessageType::AssistantToolCall,
            content: Value::String(content.into()),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }
}

/// Tool call as exchanged with callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    /// Call identifier
    pub id: String,
    /// Function name
    pub name: String,
    /// Decoded arguments
    pub args: Map<String, Value>,
}

/// Completion returned in tool-call mode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResponse {
    /// Text the model produced alongside the calls
    pub content: String,
    /// Requested calls
    pub tool_calls: Vec<LlmToolCall>,
}
