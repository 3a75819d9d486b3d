use serde::{Deserialize, Serialize};

/// Role of a normalized message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User turn
    User,
    /// Assistant turn
    Assistant,
    /// Tool result
    Tool,
}

/// Message in the shape every vendor adapter consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the author
    pub role: Role,
    /// Text content
    pub content: String,
    /// Tool calls made by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call this message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Plain message without tool data
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Whether the message carries at least one tool call
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }
}

/// Tool call requested by the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier
    pub id: String,
    /// Function name and arguments
    pub function: FunctionCall,
}

/// Function name and JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name
    pub name: String,
    /// JSON-encoded arguments
    pub arguments: String,
}

impl ToolCall {
    /// Build a tool call from raw parts
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Arguments decoded as JSON, `{}` when they do not parse
    pub fn arguments_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.function.arguments).unwrap_or_else(|_| serde_json::json!({}))
    }
}
