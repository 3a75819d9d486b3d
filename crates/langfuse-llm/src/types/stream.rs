use serde::{Deserialize, Serialize};

use super::response::{FinishReason, Usage};

/// Event produced while a completion streams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Incremental content
    Delta(StreamDelta),
    /// Final usage statistics
    Usage(Usage),
    /// Vendor signalled the end of the stream
    Done,
}

/// Incremental text within a streamed response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    /// Choice index
    pub index: u32,
    /// Text fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Present on the final delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl StreamEvent {
    /// Text delta for choice 0
    pub fn text(content: impl Into<String>) -> Self {
        Self::Delta(StreamDelta {
            index: 0,
            content: Some(content.into()),
            finish_reason: None,
        })
    }

    /// Finish marker for choice 0
    pub const fn finish(reason: FinishReason) -> Self {
        Self::Delta(StreamDelta {
            index: 0,
            content: None,
            finish_reason: Some(reason),
        })
    }
}
