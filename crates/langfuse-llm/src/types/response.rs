use serde::{Deserialize, Serialize};

use super::message::ToolCall;

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end
    Stop,
    /// Hit the token limit
    Length,
    /// Model called a tool
    ToolCalls,
    /// Filtered by vendor safety systems
    ContentFilter,
}

impl FinishReason {
    /// Parse the finish reason spellings used across vendors
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stop" | "end_turn" | "STOP" | "stop_sequence" => Some(Self::Stop),
            "length" | "max_tokens" | "MAX_TOKENS" => Some(Self::Length),
            "tool_calls" | "tool_use" => Some(Self::ToolCalls),
            "content_filter" | "SAFETY" => Some(Self::ContentFilter),
            _ => None,
        }
    }
}

/// Token usage reported by the vendor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Prompt plus completion
    pub total_tokens: u32,
}

impl Usage {
    /// Usage from prompt and completion counts
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// One generated choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Choice index
    pub index: u32,
    /// Generated message
    pub message: ChoiceMessage,
    /// Why generation stopped
    pub finish_reason: Option<FinishReason>,
}

/// Assistant message within a choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    /// Text content
    pub content: Option<String>,
    /// Tool calls requested by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// Canonical completion response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Vendor response identifier
    pub id: String,
    /// Model that produced the response
    pub model: String,
    /// Generated choices
    pub choices: Vec<Choice>,
    /// Token usage
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Single-choice response
    pub fn single(id: impl Into<String>, model: impl Into<String>, message: ChoiceMessage, usage: Option<Usage>) -> Self {
        let finish_reason = if message.tool_calls.is_some() {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };

        Self {
            id: id.into(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some(finish_reason),
            }],
            usage,
        }
    }

    /// Text of the first choice, empty when absent
    pub fn text(&self) -> String {
        self.choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
    }

    /// Tool calls of the first choice
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.choices
            .first()
            .and_then(|c| c.message.tool_calls.as_deref())
            .unwrap_or_default()
    }
}
