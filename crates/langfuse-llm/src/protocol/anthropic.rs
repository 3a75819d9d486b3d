//! Anthropic Messages API wire format

use serde::{Deserialize, Serialize};

// -- Request types --

/// Messages API request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    /// Model identifier
    pub model: String,
    /// Maximum tokens to generate (required)
    pub max_tokens: u32,
    /// System prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Conversation messages
    pub messages: Vec<AnthropicMessage>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling threshold
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Whether to stream the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Tool definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    /// Tool choice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
}

/// Message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// "user" or "assistant"
    pub role: String,
    /// Content
    pub content: AnthropicContent,
}

/// Content is either a string or a list of blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    /// Plain text
    Text(String),
    /// Content blocks
    Blocks(Vec<AnthropicContentBlock>),
}

/// Content block in a request message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    /// Text
    Text {
        /// The text
        text: String,
    },
    /// Tool use by the assistant
    ToolUse {
        /// Tool use identifier
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        input: serde_json::Value,
    },
    /// Tool result supplied by the user
    ToolResult {
        /// Tool use this answers
        tool_use_id: String,
        /// Result content
        content: String,
    },
}

/// Tool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    /// Tool name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the input
    pub input_schema: serde_json::Value,
}

/// Tool choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicToolChoice {
    /// "auto", "any" or "tool"
    #[serde(rename = "type")]
    pub choice_type: String,
    /// Tool name when type is "tool"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

// -- Response types --

/// Messages API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    /// Response identifier
    pub id: String,
    /// Response content blocks
    pub content: Vec<AnthropicResponseBlock>,
    /// Model used
    pub model: String,
    /// Stop reason
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage
    pub usage: AnthropicUsage,
}

/// Content block in a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicResponseBlock {
    /// Text
    Text {
        /// The text
        text: String,
    },
    /// Tool use request
    ToolUse {
        /// Tool use identifier
        id: String,
        /// Tool name
        name: String,
        /// Tool input
        input: serde_json::Value,
    },
    /// Extended-thinking and other blocks carry no answer text
    #[serde(other)]
    Other,
}

/// Token usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    /// Input tokens
    #[serde(default)]
    pub input_tokens: u32,
    /// Output tokens
    #[serde(default)]
    pub output_tokens: u32,
}

// -- Streaming types --

/// SSE event payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    /// Stream started
    MessageStart {
        /// Partial message
        message: AnthropicStreamMessage,
    },
    /// Incremental content within a block
    ContentBlockDelta {
        /// Block index
        index: u32,
        /// Delta
        delta: AnthropicStreamDelta,
    },
    /// Stop reason and final usage
    MessageDelta {
        /// Delta with stop reason
        delta: AnthropicMessageDelta,
        /// Output usage
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    /// Stream completed
    MessageStop,
    /// Block boundaries, pings and anything newer carry no text
    #[serde(other)]
    Other,
}

/// Partial message in `message_start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicStreamMessage {
    /// Input usage
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

/// Delta in `content_block_delta`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamDelta {
    /// Text fragment
    TextDelta {
        /// The fragment
        text: String,
    },
    /// Tool input and thinking fragments
    #[serde(other)]
    Other,
}

/// Delta in `message_delta`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessageDelta {
    /// Stop reason
    #[serde(default)]
    pub stop_reason: Option<String>,
}
